// DANS : src/cache.rs

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use crate::ton::AccountAddress;

const SEQNO_SET_KEY: &str = "hsi:seqno";
const MINTER_KEY_PREFIX: &str = "hsi:minter:";
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Contrat du cache anti-doublons. Le magasin Redis l'implémente en
/// production, les tests une doublure en mémoire.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Ajoute un seqno à l'ensemble ordonné ; `true` s'il était absent.
    async fn register_seqno(&self, seqno: u32) -> Result<bool>;
    /// Le minter a-t-il déjà été traité dans la fenêtre TTL ?
    async fn is_minter_known(&self, address: &AccountAddress) -> Result<bool>;
    /// Marque le minter comme traité pour la durée du TTL.
    async fn remember_minter(&self, address: &AccountAddress) -> Result<()>;
}

/// Cache anti-doublons Redis : fenêtre glissante de seqnos masterchain et
/// clés TTL par adresse de minter.
pub struct RedisDedupCache {
    conn: MultiplexedConnection,
    seqno_window: usize,
    minter_ttl: Duration,
}

impl RedisDedupCache {
    /// Se connecte et vérifie la liaison par un PING ; l'échec est fatal au
    /// démarrage, le magasin est requis.
    pub async fn connect(addr: &str, minter_ttl: Duration, seqno_window: usize) -> Result<Self> {
        if addr.is_empty() {
            bail!("adresse Redis vide");
        }
        let client = redis::Client::open(format!("redis://{}", addr))
            .with_context(|| format!("URL Redis invalide: {}", addr))?;
        let mut conn = client
            .get_multiplexed_tokio_connection()
            .await
            .with_context(|| format!("connexion Redis à {} impossible", addr))?;

        tokio::time::timeout(
            PING_TIMEOUT,
            redis::cmd("PING").query_async::<_, String>(&mut conn),
        )
        .await
        .context("PING Redis hors délai")?
        .context("PING Redis refusé")?;

        info!(addr = addr, "Redis connecté");
        Ok(Self {
            conn,
            seqno_window: if seqno_window > 0 { seqno_window } else { 1000 },
            minter_ttl,
        })
    }

    fn minter_key(address: &AccountAddress) -> String {
        format!("{}{}", MINTER_KEY_PREFIX, address.canonical())
    }

    // Ne garde que les `seqno_window` entrées les plus récentes.
    async fn trim_seqno(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.zcard(SEQNO_SET_KEY).await?;
        let excess = count - self.seqno_window as i64;
        if excess > 0 {
            let _: i64 = conn
                .zremrangebyrank(SEQNO_SET_KEY, 0, (excess - 1) as isize)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStore for RedisDedupCache {
    async fn register_seqno(&self, seqno: u32) -> Result<bool> {
        if seqno == 0 {
            return Ok(true);
        }
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(SEQNO_SET_KEY)
            .arg("NX")
            .arg(seqno)
            .arg(seqno)
            .query_async(&mut conn)
            .await?;
        if added == 0 {
            return Ok(false);
        }
        self.trim_seqno().await?;
        Ok(true)
    }

    async fn is_minter_known(&self, address: &AccountAddress) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::minter_key(address)).await?;
        Ok(exists)
    }

    async fn remember_minter(&self, address: &AccountAddress) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                Self::minter_key(address),
                1,
                self.minter_ttl.as_secs().max(1),
            )
            .await?;
        Ok(())
    }
}
