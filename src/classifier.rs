// DANS : src/classifier.rs

use crate::ton::tlb::{AccountStatus, Transaction};

/// Verdict du classifieur de déploiement.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub is_deploy: bool,
    /// Empreinte hex minuscule du code déployé, quand elle est extractible.
    pub code_fingerprint: Option<String>,
}

/// Décide si une transaction déploie un nouveau contrat.
///
/// Trois conditions, toutes requises :
///   1. le hash d'état du compte a changé ;
///   2. le message entrant porte un StateInit avec du code ;
///   3. le compte passe de uninit/nonexist à active.
pub fn classify(tx: &Transaction) -> Classification {
    if tx.state_update.old_hash == tx.state_update.new_hash {
        return Classification::default();
    }

    let code = match tx.in_msg.as_ref().and_then(|m| m.state_init.as_ref()) {
        Some(init) => match init.code.as_ref() {
            Some(code) => code,
            None => return Classification::default(),
        },
        None => return Classification::default(),
    };

    let was_empty = matches!(
        tx.orig_status,
        AccountStatus::Uninit | AccountStatus::Nonexist
    );
    if !was_empty || tx.end_status != AccountStatus::Active {
        return Classification::default();
    }

    Classification {
        is_deploy: true,
        code_fingerprint: Some(code.hash_hex()),
    }
}
