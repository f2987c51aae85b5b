// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};
use warp::Filter;

lazy_static! {
    // --- Ingestion ---
    pub static ref MASTER_BLOCKS_PROCESSED: IntCounter = register_int_counter!(
        "hsi_master_blocks_processed_total", "Nombre de blocs masterchain traités"
    ).unwrap();
    pub static ref SHARD_BLOCKS_PROCESSED: IntCounter = register_int_counter!(
        "hsi_shard_blocks_processed_total", "Nombre de blocs de shard traités"
    ).unwrap();
    pub static ref TRANSACTIONS_SCANNED: IntCounter = register_int_counter!(
        "hsi_transactions_scanned_total", "Nombre de transactions chargées et classifiées"
    ).unwrap();
    pub static ref LAST_MASTER_SEQNO: IntGauge = register_int_gauge!(
        "hsi_last_master_seqno", "Dernier seqno masterchain traité avec succès"
    ).unwrap();
    pub static ref BLOCK_PROCESS_LATENCY: Histogram = register_histogram!(
        "hsi_block_process_latency_seconds",
        "Latence du traitement complet d'un bloc masterchain (shards compris)"
    ).unwrap();

    // --- Détection ---
    pub static ref DEPLOYS_DETECTED: IntCounter = register_int_counter!(
        "hsi_deploys_detected_total", "Transactions de déploiement détectées"
    ).unwrap();
    pub static ref MINTERS_DISCOVERED: IntCounterVec = register_int_counter_vec!(
        "hsi_minters_discovered_total",
        "Jetton Minters découverts, segmentés par mode de vérification",
        &["verification"] // "known_code", "interface", "both"
    ).unwrap();
    pub static ref DETECTION_LATENCY: Histogram = register_histogram!(
        "hsi_detection_latency_seconds",
        "Latence entre l'horodatage du bloc et l'émission de la découverte"
    ).unwrap();

    // --- Liteservers ---
    pub static ref LITESERVER_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "hsi_liteserver_requests_total",
        "Requêtes liteserver, segmentées par méthode et statut",
        &["method", "status"]
    ).unwrap();

    // --- Dédoublonnage & sorties ---
    pub static ref CACHE_FAILURES: IntCounter = register_int_counter!(
        "hsi_cache_failures_total", "Opérations Redis échouées (mode fail-open)"
    ).unwrap();
    pub static ref DUPLICATES_SUPPRESSED: IntCounter = register_int_counter!(
        "hsi_duplicates_suppressed_total", "Découvertes écartées par le cache anti-doublons"
    ).unwrap();
    pub static ref SINK_DELIVERIES: IntCounterVec = register_int_counter_vec!(
        "hsi_sink_deliveries_total",
        "Livraisons aux sorties de notification, par sortie et statut",
        &["sink", "status"]
    ).unwrap();
    pub static ref SINK_LATENCY: HistogramVec = register_histogram_vec!(
        "hsi_sink_latency_seconds",
        "Latence de livraison par sortie",
        &["sink"]
    ).unwrap();
}

// Le serveur expose /metrics au format texte Prometheus.
pub async fn start_metrics_server(port: u16) {
    let metrics_route = warp::path!("metrics").map(|| {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&prometheus::gather(), &mut buffer).unwrap();
        warp::reply::with_header(buffer, "content-type", "text/plain; version=0.0.4")
    });
    tracing::info!(port = port, "serveur de métriques exposé sur /metrics");
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}
