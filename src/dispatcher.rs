// DANS : src/dispatcher.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::DedupStore;
use crate::monitoring::metrics;
use crate::notifier::{DiscoveryEvent, Notifier};
use crate::registry::FingerprintRegistry;
use crate::ton::{AccountAddress, NodeView};
use crate::verifier::InterfaceVerifier;

/// Candidat au déploiement remonté par les workers de shard.
#[derive(Debug, Clone)]
pub struct DeployEvent {
    pub address: AccountAddress,
    pub code_fingerprint: Option<String>,
    pub seqno: u32,
    pub workchain: i32,
    pub shard: u64,
    pub lt: u64,
    pub tx_hash: Option<String>,
    pub block_utime: u32,
}

/// Aiguilleur : dédoublonne, vérifie puis livre chaque découverte.
/// Politique fail-open sur le cache : un Redis en panne vaut un cache vide.
pub struct Dispatcher {
    registry: Arc<FingerprintRegistry>,
    cache: Arc<dyn DedupStore>,
    verifier: InterfaceVerifier,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<FingerprintRegistry>,
        cache: Arc<dyn DedupStore>,
        notifier: Notifier,
    ) -> Self {
        let verifier = InterfaceVerifier::new(registry.clone());
        Self { registry, cache, verifier, notifier }
    }

    /// Traite un candidat. Les erreurs internes sont journalisées, jamais
    /// remontées : un handler ne doit pas interrompre l'ingestion.
    pub async fn handle(&self, session: &dyn NodeView, event: DeployEvent) {
        // 1. Rejet rapide des adresses déjà traitées dans la fenêtre TTL.
        match self.cache.is_minter_known(&event.address).await {
            Ok(true) => {
                metrics::DUPLICATES_SUPPRESSED.inc();
                debug!(adresse = %event.address, "minter déjà traité, ignoré");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                metrics::CACHE_FAILURES.inc();
                warn!(erreur = %e, "cache illisible, on continue comme sur un manque");
            }
        }

        // 2. Empreinte de repli via l'état du compte quand le classifieur
        //    n'a rien pu extraire.
        let fingerprint = match &event.code_fingerprint {
            Some(fp) => fp.clone(),
            None => match session.account_code_fingerprint(&event.address).await {
                Ok(Some(fp)) => fp,
                Ok(None) => {
                    debug!(adresse = %event.address, "compte sans code, candidat abandonné");
                    return;
                }
                Err(e) => {
                    debug!(adresse = %event.address, erreur = %e, "empreinte introuvable, candidat abandonné");
                    return;
                }
            },
        };

        // 3. Vérification d'interface.
        let Some(meta) = self
            .verifier
            .inspect(session, &event.address, &fingerprint, event.block_utime)
            .await
        else {
            debug!(adresse = %event.address, "pas un minter, ignoré");
            return;
        };

        // 4. Mémorisation avant livraison : la fenêtre TTL commence ici.
        if let Err(e) = self.cache.remember_minter(&event.address).await {
            metrics::CACHE_FAILURES.inc();
            warn!(erreur = %e, adresse = %event.address, "mémorisation du minter échouée");
        }

        // 5. Une interface valide sur un code inconnu enrichit le registre.
        if meta.interface_verified && !meta.known_fingerprint {
            if self.registry.note_auto_verified(&fingerprint) {
                info!(
                    empreinte = fingerprint.as_str(),
                    "nouvelle empreinte auto-vérifiée enregistrée"
                );
            }
        }

        let verification = match (meta.interface_verified, meta.known_fingerprint) {
            (true, true) => "both",
            (true, false) => "interface",
            _ => "known_code",
        };
        metrics::MINTERS_DISCOVERED
            .with_label_values(&[verification])
            .inc();

        info!(
            adresse = %meta.address,
            nom = meta.name.as_str(),
            symbole = meta.symbol.as_str(),
            type_minter = meta.minter_type.as_str(),
            latence_ms = meta.latency_ms,
            "🎯 Jetton Minter découvert"
        );

        // 6. Livraison parallèle à toutes les sorties.
        let discovery = DiscoveryEvent {
            block_unixtime: event.block_utime as i64,
            seqno: event.seqno,
            workchain: event.workchain,
            tx_hash: event.tx_hash.clone(),
            tx_lt: event.lt,
            meta,
        };
        self.notifier.dispatch(&discovery).await;
    }
}
