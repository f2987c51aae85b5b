// DANS : src/indexer/shard_pool.rs
//
// Fan-out des shards d'un bloc masterchain : un canal borné alimente un
// nombre fixe de workers. On ne lance jamais une tâche par shard sans borne,
// la tête du masterchain dériverait sous charge.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::classifier;
use crate::dispatcher::{DeployEvent, Dispatcher};
use crate::monitoring::metrics;
use crate::ton::{BlockId, NodeView, PoolError, TxCursor};

const CHANNEL_CAPACITY: usize = 64;

/// Nombre de workers : borné entre 8 et 64, quatre par cœur.
pub fn worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cores * 4).clamp(8, 64)
}

/// Traite tous les blocs (masterchain compris) d'un seqno via le pool de
/// workers. Échoue si au moins un shard n'a pas pu être traité entièrement,
/// pour que le seqno soit rejoué au tick suivant.
pub async fn process_blocks(
    session: Arc<dyn NodeView>,
    blocks: Vec<BlockId>,
    dispatcher: Arc<Dispatcher>,
    mc_seqno: u32,
    workers: usize,
) -> Result<()> {
    if blocks.is_empty() {
        return Ok(());
    }

    let (tx, rx) = mpsc::channel::<BlockId>(CHANNEL_CAPACITY);
    let rx = Arc::new(Mutex::new(rx));
    let failed = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for _ in 0..workers.min(blocks.len()).max(1) {
        let rx = rx.clone();
        let session = session.clone();
        let dispatcher = dispatcher.clone();
        let failed = failed.clone();
        set.spawn(async move {
            loop {
                let block = { rx.lock().await.recv().await };
                let Some(block) = block else { break };
                if let Err(e) = process_shard(&*session, &block, &dispatcher, mc_seqno).await {
                    warn!(bloc = %block, seqno = mc_seqno, erreur = %e, "shard incomplet");
                    failed.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics::SHARD_BLOCKS_PROCESSED.inc();
                }
            }
        });
    }

    for block in blocks {
        if tx.send(block).await.is_err() {
            break;
        }
    }
    drop(tx);

    while set.join_next().await.is_some() {}

    let failures = failed.load(Ordering::Relaxed);
    if failures > 0 {
        bail!("{} shard(s) en échec pour le seqno {}", failures, mc_seqno);
    }
    Ok(())
}

// Un shard : pagination des transactions, classification, aiguillage des
// déploiements. Une transaction illisible est sautée mais marque le shard
// comme incomplet, le bloc sera rejoué.
async fn process_shard(
    session: &dyn NodeView,
    block: &BlockId,
    dispatcher: &Dispatcher,
    mc_seqno: u32,
) -> Result<()> {
    let mut cursor: Option<TxCursor> = None;
    let mut incomplete = false;

    loop {
        let page = session.block_transactions(block, cursor).await?;

        for id in &page.ids {
            metrics::TRANSACTIONS_SCANNED.inc();
            let tx = match session.transaction(block, id.account, id.lt).await {
                Ok(tx) => tx,
                Err(PoolError::Transient(e)) => {
                    debug!(bloc = %block, lt = id.lt, erreur = e.as_str(), "transaction sautée");
                    incomplete = true;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let verdict = classifier::classify(&tx);
            if !verdict.is_deploy {
                continue;
            }
            metrics::DEPLOYS_DETECTED.inc();

            let event = DeployEvent {
                address: crate::ton::AccountAddress::new(block.workchain, tx.account),
                code_fingerprint: verdict.code_fingerprint,
                seqno: mc_seqno,
                workchain: block.workchain,
                shard: block.shard,
                lt: tx.lt,
                tx_hash: Some(hex::encode(tx.hash)),
                block_utime: tx.now,
            };
            dispatcher.handle(session, event).await;
        }

        if !page.has_more {
            break;
        }
        cursor = page
            .ids
            .last()
            .map(|id| TxCursor { account: id.account, lt: id.lt });
        if cursor.is_none() {
            // Page vide annoncée incomplète : on coupe court.
            break;
        }
    }

    if incomplete {
        bail!("transactions sautées dans le bloc {}", block);
    }
    Ok(())
}
