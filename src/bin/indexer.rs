// DANS : src/bin/indexer.rs

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use hypersniper::cache::{DedupStore, RedisDedupCache};
use hypersniper::config::Config;
use hypersniper::dispatcher::Dispatcher;
use hypersniper::indexer::{Service, ServiceOptions};
use hypersniper::monitoring::{logging, metrics};
use hypersniper::notifier::Notifier;
use hypersniper::registry::FingerprintRegistry;
use hypersniper::ton::global_config::{self, LiteserverEndpoint};
use hypersniper::ton::pool::{LiteserverPool, RetryPolicy};
use hypersniper::ton::LitePool;

const METRICS_PORT: u16 = 9100;

#[derive(Parser, Debug)]
#[command(name = "indexer", about = "Indexeur basse latence de Jetton Minters")]
struct Args {
    /// Réseau cible, surcharge la configuration (mainnet ou testnet).
    #[arg(long)]
    network: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();
    let args = Args::parse();

    let mut cfg = Config::load().context("chargement de la configuration")?;
    if let Some(network) = args.network {
        cfg.app.network = network.trim().to_lowercase();
    }
    if cfg.app.network != "mainnet" && cfg.app.network != "testnet" {
        bail!("réseau inconnu: {}", cfg.app.network);
    }

    info!(
        network = cfg.app.network.as_str(),
        catchup_hours = cfg.app.catchup_hours,
        "🚀 démarrage de HyperSniper Indexer"
    );

    tokio::spawn(metrics::start_metrics_server(METRICS_PORT));

    // Le cache anti-doublons est requis : sans lui, on s'arrête tout de suite.
    let cache = RedisDedupCache::connect(
        &cfg.redis.addr,
        cfg.minter_cache_duration(),
        cfg.app.master_seqno_cache_size,
    )
    .await
    .context("initialisation du cache Redis")?;
    let cache: Arc<dyn DedupStore> = Arc::new(cache);

    // Liteservers : descripteurs manuels, sinon config global du réseau.
    let endpoints: Vec<LiteserverEndpoint> = if cfg.app.liteservers_list.is_empty() {
        global_config::fetch_endpoints(global_config::config_url(&cfg.app.network))
            .await
            .context("récupération du config global")?
    } else {
        info!(count = cfg.app.liteservers_list.len(), "liteservers fournis par la config");
        cfg.app
            .liteservers_list
            .iter()
            .map(|raw| global_config::parse_endpoint_descriptor(raw))
            .collect::<Result<Vec<_>>>()?
    };

    let pool = LiteserverPool::connect(endpoints, RetryPolicy::default())
        .await
        .context("connexion aux liteservers")?;
    info!(connexions = pool.connection_count(), "✅ connexion TON établie");
    let pool: Arc<dyn LitePool> = Arc::new(pool);

    let registry = Arc::new(FingerprintRegistry::new(&cfg.app.known_code_hashes));
    info!(empreintes = registry.len(), "✅ registre d'empreintes initialisé");

    let notifier = Notifier::from_config(&cfg).context("initialisation des sorties")?;
    info!(sorties = notifier.sink_count(), "✅ notificateur prêt");

    let dispatcher = Arc::new(Dispatcher::new(registry, cache.clone(), notifier));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = Arc::new(Service::new(
        pool,
        dispatcher,
        cache,
        ServiceOptions::from_config(&cfg),
        shutdown_rx,
    ));

    info!("✅ indexeur lancé, objectif : détecter les nouveaux Jetton Minters en 1-2 s");

    let runner = {
        let service = service.clone();
        tokio::spawn(async move { service.run().await })
    };

    wait_for_shutdown().await;
    info!("🛑 signal reçu, arrêt en cours...");
    shutdown_tx.send(true).ok();

    match runner.await {
        Ok(Ok(())) => info!("✅ indexeur arrêté proprement"),
        Ok(Err(e)) => {
            error!(erreur = %e, "l'indexeur s'est arrêté en erreur");
            return Err(e);
        }
        Err(e) => bail!("la tâche d'ingestion a paniqué: {}", e),
    }
    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
