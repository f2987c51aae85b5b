// DANS : src/indexer/mod.rs
//
// Boucle d'ingestion : rattrapage borné puis abonnement temps réel à la tête
// du masterchain. Les seqnos avancent strictement un par un ; un bloc en
// échec est rejoué au tick suivant, jamais sauté en silence.

pub mod shard_pool;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::DedupStore;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::monitoring::metrics;
use crate::ton::LitePool;

// Un bloc masterchain toutes les ~5 secondes : la conversion du rattrapage
// horaire en nombre de blocs part de là.
const SECONDS_PER_BLOCK: u64 = 5;
const CATCHUP_PROGRESS_EVERY: u32 = 1000;

/// Réglages de la boucle, dérivés de la configuration.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub poll_interval: Duration,
    pub block_deadline: Duration,
    pub catchup: Duration,
    pub workers: usize,
}

impl ServiceOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            block_deadline: Duration::from_secs(5),
            catchup: cfg.catchup_duration(),
            workers: shard_pool::worker_count(),
        }
    }
}

/// Service d'indexation temps réel.
pub struct Service {
    pool: Arc<dyn LitePool>,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<dyn DedupStore>,
    options: ServiceOptions,
    shutdown: watch::Receiver<bool>,
    last_seqno: Mutex<u32>,
}

impl Service {
    pub fn new(
        pool: Arc<dyn LitePool>,
        dispatcher: Arc<Dispatcher>,
        cache: Arc<dyn DedupStore>,
        options: ServiceOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            dispatcher,
            cache,
            options,
            shutdown,
            last_seqno: Mutex::new(0),
        }
    }

    /// Dernier seqno masterchain traité avec succès.
    pub fn last_processed_seqno(&self) -> u32 {
        *self.last_seqno.lock().unwrap()
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Rattrapage borné puis boucle d'abonnement ; rend la main à l'arrêt.
    pub async fn run(&self) -> Result<()> {
        let head = self
            .pool
            .session()
            .await
            .context("ouverture de session impossible")?
            .masterchain_head()
            .await
            .context("tête du masterchain inaccessible")?;

        if !self.options.catchup.is_zero() {
            self.catchup(head.seqno).await;
        } else {
            info!("rattrapage désactivé, démarrage à la tête courante");
        }

        *self.last_seqno.lock().unwrap() = head.seqno;
        metrics::LAST_MASTER_SEQNO.set(head.seqno as i64);
        info!(seqno = head.seqno, "abonnement aux nouveaux blocs");

        self.subscribe_loop().await;
        info!("boucle d'ingestion arrêtée");
        Ok(())
    }

    // Rattrapage : best-effort sur une fenêtre bornée, les seqnos déjà vus
    // dans le cache sont sautés (idempotence approximative de la reprise).
    async fn catchup(&self, head_seqno: u32) {
        let blocks_back = (self.options.catchup.as_secs() / SECONDS_PER_BLOCK) as u32;
        let start = head_seqno.saturating_sub(blocks_back).max(1);
        info!(
            from = start,
            to = head_seqno,
            blocks = head_seqno - start,
            "démarrage du rattrapage"
        );

        for seqno in start..=head_seqno {
            if self.is_shutdown() {
                return;
            }
            match self.cache.register_seqno(seqno).await {
                Ok(false) => continue, // déjà traité lors d'une vie antérieure
                Ok(true) => {}
                Err(e) => {
                    metrics::CACHE_FAILURES.inc();
                    debug!(erreur = %e, "cache illisible pendant le rattrapage");
                }
            }
            match tokio::time::timeout(
                self.options.block_deadline,
                self.process_masterchain_block(seqno),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(seqno = seqno, erreur = %e, "bloc historique sauté"),
                Err(_) => debug!(seqno = seqno, "bloc historique hors délai, sauté"),
            }
            if seqno % CATCHUP_PROGRESS_EVERY == 0 {
                let done = seqno - start;
                let total = (head_seqno - start).max(1);
                info!(
                    seqno = seqno,
                    pourcentage = done as f64 / total as f64 * 100.0,
                    "rattrapage en cours"
                );
            }
        }
        info!("rattrapage terminé");
    }

    async fn subscribe_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if self.is_shutdown() {
                return;
            }

            let head = match self.pool.session().await {
                Ok(session) => session.masterchain_head().await,
                Err(e) => Err(e),
            };
            let head = match head {
                Ok(h) => h,
                Err(e) => {
                    warn!(erreur = %e, "tête du masterchain inaccessible");
                    self.sleep_tick(&mut shutdown).await;
                    continue;
                }
            };

            let last = self.last_processed_seqno();
            if head.seqno > last {
                // Tous les blocs manquants, dans l'ordre. Au premier échec on
                // repart du même seqno au tick suivant.
                for seqno in last + 1..=head.seqno {
                    if self.is_shutdown() {
                        return;
                    }
                    let started = Instant::now();
                    let outcome = tokio::time::timeout(
                        self.options.block_deadline,
                        self.process_masterchain_block(seqno),
                    )
                    .await;

                    match outcome {
                        Ok(Ok(())) => {
                            *self.last_seqno.lock().unwrap() = seqno;
                            metrics::LAST_MASTER_SEQNO.set(seqno as i64);
                            metrics::MASTER_BLOCKS_PROCESSED.inc();
                            metrics::BLOCK_PROCESS_LATENCY
                                .observe(started.elapsed().as_secs_f64());
                            debug!(
                                seqno = seqno,
                                latence_ms = started.elapsed().as_millis() as u64,
                                "bloc traité"
                            );
                        }
                        Ok(Err(e)) => {
                            warn!(seqno = seqno, erreur = %e, "bloc en échec, rejeu au prochain tick");
                            break;
                        }
                        Err(_) => {
                            warn!(seqno = seqno, "échéance de bloc dépassée, rejeu au prochain tick");
                            break;
                        }
                    }
                }
            }

            self.sleep_tick(&mut shutdown).await;
        }
    }

    // Un seqno : session épinglée, résolution du bloc, shards, fan-out.
    async fn process_masterchain_block(&self, seqno: u32) -> Result<()> {
        let session = self.pool.session().await?;
        let master = session.lookup_masterchain_block(seqno).await?;
        let shards = session.shard_blocks(&master).await?;

        match self.cache.register_seqno(seqno).await {
            Ok(_) => {}
            Err(e) => {
                metrics::CACHE_FAILURES.inc();
                debug!(erreur = %e, seqno = seqno, "enregistrement du seqno échoué");
            }
        }

        let mut blocks = Vec::with_capacity(shards.len() + 1);
        blocks.push(master);
        blocks.extend(shards);

        shard_pool::process_blocks(
            session,
            blocks,
            self.dispatcher.clone(),
            seqno,
            self.options.workers,
        )
        .await
    }

    async fn sleep_tick(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.options.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}
