// DANS : src/ton/pool.rs
//
// Pool de connexions liteserver. Une session épingle toutes les requêtes d'un
// même seqno masterchain sur une seule connexion : des liteservers différents
// peuvent être en retard les uns sur les autres, une vue de bloc doit rester
// cohérente. Les erreurs passagères sont rejouées avec backoff exponentiel
// jusqu'à l'échéance de l'opération.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::adnl::AdnlClient;
use super::global_config::LiteserverEndpoint;
use super::tl::{self, LiteErrorWrap};
use super::tlb::{AccountState, Transaction};
use super::{boc, stack, tlb, AccountAddress, BlockId, StackValue};
use crate::monitoring::metrics;

/// Erreur du pool : passagère (réseau, délai, retard de hauteur) ou fatale
/// (réponse malformée). Les passagères sont rejouées, les fatales remontent.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("erreur passagère: {0}")]
    Transient(String),
    #[error("erreur fatale: {0}")]
    Fatal(String),
}

impl PoolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn transient(e: impl std::fmt::Display) -> Self {
        Self::Transient(e.to_string())
    }

    fn fatal(e: impl std::fmt::Display) -> Self {
        Self::Fatal(e.to_string())
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Curseur de pagination de `listBlockTransactions`.
#[derive(Debug, Clone, Copy)]
pub struct TxCursor {
    pub account: [u8; 32],
    pub lt: u64,
}

/// Identifiant court de transaction renvoyé par la pagination.
#[derive(Debug, Clone, Copy)]
pub struct TxShortInfo {
    pub account: [u8; 32],
    pub lt: u64,
    pub hash: Option<[u8; 32]>,
}

/// Une page de transactions d'un bloc.
#[derive(Debug, Clone)]
pub struct TxPage {
    pub ids: Vec<TxShortInfo>,
    pub has_more: bool,
}

/// Vue d'un nœud à travers une session : le contrat consommé par l'ingestion,
/// le classifieur et le vérificateur. Les doublures de test l'implémentent.
#[async_trait]
pub trait NodeView: Send + Sync {
    async fn masterchain_head(&self) -> PoolResult<BlockId>;
    async fn lookup_masterchain_block(&self, seqno: u32) -> PoolResult<BlockId>;
    async fn shard_blocks(&self, master: &BlockId) -> PoolResult<Vec<BlockId>>;
    async fn block_transactions(
        &self,
        block: &BlockId,
        after: Option<TxCursor>,
    ) -> PoolResult<TxPage>;
    async fn transaction(
        &self,
        block: &BlockId,
        account: [u8; 32],
        lt: u64,
    ) -> PoolResult<Transaction>;
    async fn run_get_method(
        &self,
        address: &AccountAddress,
        method: &str,
    ) -> PoolResult<Vec<StackValue>>;
    /// Empreinte du code du compte, `None` si le compte n'est pas actif.
    async fn account_code_fingerprint(
        &self,
        address: &AccountAddress,
    ) -> PoolResult<Option<String>>;
}

/// Fabrique de sessions. Le pool de production et les doublures de test
/// l'implémentent.
#[async_trait]
pub trait LitePool: Send + Sync {
    async fn session(&self) -> PoolResult<Arc<dyn NodeView>>;
}

/// Paramètres de rejeu des opérations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub op_deadline: Duration,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            op_deadline: Duration::from_secs(3),
            base_backoff: Duration::from_millis(100),
        }
    }
}

// Une connexion du pool, reconnectée à la demande après une coupure.
struct PoolConn {
    endpoint: LiteserverEndpoint,
    client: Mutex<Option<AdnlClient>>,
}

impl PoolConn {
    async fn acquire(&self) -> PoolResult<AdnlClient> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
            debug!(peer = %self.endpoint.addr, "reconnexion au liteserver");
        }
        let client = AdnlClient::connect(&self.endpoint.addr, &self.endpoint.public_key)
            .await
            .map_err(PoolError::transient)?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn query(&self, payload: &[u8], timeout: Duration) -> PoolResult<Vec<u8>> {
        let client = self.acquire().await?;
        client
            .query(payload, timeout)
            .await
            .map_err(PoolError::transient)
    }
}

/// Pool de N connexions liteserver.
pub struct LiteserverPool {
    conns: Vec<Arc<PoolConn>>,
    cursor: AtomicUsize,
    retry: RetryPolicy,
}

impl LiteserverPool {
    /// Se connecte à tous les liteservers fournis ; au moins une connexion
    /// doit aboutir, sinon le démarrage échoue.
    pub async fn connect(
        endpoints: Vec<LiteserverEndpoint>,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let mut conns = Vec::new();
        for endpoint in endpoints {
            match AdnlClient::connect(&endpoint.addr, &endpoint.public_key).await {
                Ok(client) => {
                    conns.push(Arc::new(PoolConn {
                        endpoint,
                        client: Mutex::new(Some(client)),
                    }));
                }
                Err(e) => {
                    warn!(peer = %endpoint.addr, erreur = %e, "liteserver injoignable, ignoré");
                }
            }
        }
        if conns.is_empty() {
            anyhow::bail!("aucun liteserver joignable");
        }
        Ok(Self {
            conns,
            cursor: AtomicUsize::new(0),
            retry,
        })
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }
}

#[async_trait]
impl LitePool for LiteserverPool {
    async fn session(&self) -> PoolResult<Arc<dyn NodeView>> {
        // Tourniquet : chaque session épingle une connexion pour sa durée de vie.
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        Ok(Arc::new(LiteSession {
            conn: self.conns[idx].clone(),
            retry: self.retry,
        }))
    }
}

/// Session épinglée : toutes les requêtes partent vers la même connexion.
pub struct LiteSession {
    conn: Arc<PoolConn>,
    retry: RetryPolicy,
}

impl LiteSession {
    // Rejeu avec backoff exponentiel jusqu'à l'échéance de l'opération.
    async fn call<T>(
        &self,
        method: &'static str,
        query: Vec<u8>,
        parse: impl Fn(&[u8]) -> anyhow::Result<T>,
    ) -> PoolResult<T> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let remaining = self
                .retry
                .op_deadline
                .checked_sub(started.elapsed())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                metrics::LITESERVER_REQUESTS
                    .with_label_values(&[method, "deadline"])
                    .inc();
                return Err(PoolError::Transient(format!(
                    "échéance de {} dépassée",
                    method
                )));
            }

            match self.conn.query(&query, remaining).await {
                Ok(raw) => match parse(&raw) {
                    Ok(value) => {
                        metrics::LITESERVER_REQUESTS
                            .with_label_values(&[method, "success"])
                            .inc();
                        return Ok(value);
                    }
                    Err(e) => {
                        // Un code d'erreur liteserver signale surtout un retard
                        // de hauteur : on rejoue. Une réponse malformée non.
                        if e.downcast_ref::<LiteErrorWrap>().is_some() {
                            metrics::LITESERVER_REQUESTS
                                .with_label_values(&[method, "lite_error"])
                                .inc();
                            debug!(method = method, erreur = %e, "erreur liteserver, rejeu");
                        } else {
                            metrics::LITESERVER_REQUESTS
                                .with_label_values(&[method, "malformed"])
                                .inc();
                            return Err(PoolError::fatal(e));
                        }
                    }
                },
                Err(e) => {
                    metrics::LITESERVER_REQUESTS
                        .with_label_values(&[method, "transport"])
                        .inc();
                    debug!(method = method, erreur = %e, "erreur de transport, rejeu");
                }
            }

            let backoff = self.retry.base_backoff * 2u32.saturating_pow(attempt);
            tokio::time::sleep(backoff.min(Duration::from_secs(1)).min(remaining)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl NodeView for LiteSession {
    async fn masterchain_head(&self) -> PoolResult<BlockId> {
        self.call(
            "get_masterchain_info",
            tl::build_get_masterchain_info(),
            tl::parse_masterchain_info,
        )
        .await
    }

    async fn lookup_masterchain_block(&self, seqno: u32) -> PoolResult<BlockId> {
        self.call(
            "lookup_block",
            tl::build_lookup_block(
                super::MASTERCHAIN_WORKCHAIN,
                super::MASTERCHAIN_SHARD,
                seqno,
            ),
            tl::parse_block_header,
        )
        .await
    }

    async fn shard_blocks(&self, master: &BlockId) -> PoolResult<Vec<BlockId>> {
        self.call(
            "get_all_shards_info",
            tl::build_get_all_shards_info(master),
            |raw| {
                let data = tl::parse_all_shards_info(raw)?;
                let root = boc::decode(&data)?;
                tlb::parse_shard_config(&root)
            },
        )
        .await
    }

    async fn block_transactions(
        &self,
        block: &BlockId,
        after: Option<TxCursor>,
    ) -> PoolResult<TxPage> {
        self.call(
            "list_block_transactions",
            tl::build_list_block_transactions(block, 100, after.as_ref()),
            |raw| {
                let (ids, has_more) = tl::parse_block_transactions(raw)?;
                Ok(TxPage { ids, has_more })
            },
        )
        .await
    }

    async fn transaction(
        &self,
        block: &BlockId,
        account: [u8; 32],
        lt: u64,
    ) -> PoolResult<Transaction> {
        self.call(
            "get_one_transaction",
            tl::build_get_one_transaction(block, &account, lt),
            |raw| {
                let data = tl::parse_transaction_info(raw)?;
                let root = boc::decode(&data)?;
                Transaction::load(&root)
            },
        )
        .await
    }

    async fn run_get_method(
        &self,
        address: &AccountAddress,
        method: &str,
    ) -> PoolResult<Vec<StackValue>> {
        // Le get-method s'évalue contre la tête courante du masterchain,
        // résolue sur la même connexion.
        let head = self.masterchain_head().await?;
        let params = boc::encode(&stack::build_stack(&[]).map_err(PoolError::fatal)?);
        let method_owned = method.to_string();
        self.call(
            "run_smc_method",
            tl::build_run_smc_method(&head, address.workchain, &address.id, method, &params),
            move |raw| {
                let (exit_code, result) = tl::parse_run_method_result(raw)?;
                if exit_code != 0 && exit_code != 1 {
                    anyhow::bail!("{}: exit code {}", method_owned, exit_code);
                }
                let data = result
                    .ok_or_else(|| anyhow::anyhow!("résultat de get-method absent"))?;
                let root = boc::decode(&data)?;
                stack::parse_stack(&root)
            },
        )
        .await
    }

    async fn account_code_fingerprint(
        &self,
        address: &AccountAddress,
    ) -> PoolResult<Option<String>> {
        let head = self.masterchain_head().await?;
        self.call(
            "get_account_state",
            tl::build_get_account_state(&head, address.workchain, &address.id),
            |raw| {
                let state = tl::parse_account_state(raw)?;
                if state.is_empty() {
                    return Ok(None);
                }
                let root = boc::decode(&state)?;
                match AccountState::load(&root)? {
                    AccountState::Active(init) => Ok(init.code.map(|c| c.hash_hex())),
                    _ => Ok(None),
                }
            },
        )
        .await
    }
}
