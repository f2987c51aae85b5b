// DANS : src/notifier/payload.rs
//
// Structures miroirs sérialisables de l'événement de découverte, telles que
// les consomme le bot de trading en aval.

use serde::Serialize;

use crate::verifier::MinterMetadata;

pub const TONVIEWER_BASE: &str = "https://tonviewer.com/";
pub const TONSCAN_BASE: &str = "https://tonscan.org/address/";
pub const DEXSCREENER_BASE: &str = "https://dexscreener.com/ton/";

pub const EVENT_NAME: &str = "jetton_minter_deployed";
pub const EVENT_HEADER: &str = "X-HyperSniper-Event";

/// Événement de découverte complet : métadonnées du minter plus le contexte
/// du bloc d'origine.
#[derive(Debug, Clone)]
pub struct DiscoveryEvent {
    pub meta: MinterMetadata,
    pub seqno: u32,
    pub workchain: i32,
    pub tx_hash: Option<String>,
    pub tx_lt: u64,
    pub block_unixtime: i64,
}

// --- Enveloppe JSON du webhook ---

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub event: &'static str,
    pub minter_address: String,
    pub workchain: i32,
    pub seqno: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "is_zero_lt")]
    pub tx_lt: u64,
    pub code_hash: String,
    pub jetton: JettonInfo,
    pub admin: AdminInfo,
    pub flags: FlagsInfo,
    pub meta: MetaInfo,
    pub links: LinksInfo,
}

#[derive(Debug, Serialize)]
pub struct JettonInfo {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub total_supply: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content_uri: String,
}

#[derive(Debug, Serialize)]
pub struct AdminInfo {
    pub address: String,
    pub is_contract: bool,
}

#[derive(Debug, Serialize)]
pub struct FlagsInfo {
    pub mintable: bool,
    pub verified_by_interface: bool,
    pub known_code_hash: bool,
}

#[derive(Debug, Serialize)]
pub struct MetaInfo {
    pub block_unixtime: i64,
    pub indexer_unixtime: i64,
    pub latency_ms: i64,
    pub minter_type: String,
}

#[derive(Debug, Serialize)]
pub struct LinksInfo {
    pub tonviewer: String,
    pub tonscan: String,
    pub dexscreener: String,
}

fn is_zero_lt(lt: &u64) -> bool {
    *lt == 0
}

impl DiscoveryEvent {
    pub fn webhook_payload(&self) -> WebhookPayload {
        let m = &self.meta;
        let address = m.address.canonical();
        WebhookPayload {
            event: EVENT_NAME,
            minter_address: address.clone(),
            workchain: self.workchain,
            seqno: self.seqno,
            tx_hash: self.tx_hash.clone(),
            tx_lt: self.tx_lt,
            code_hash: m.code_fingerprint.clone(),
            jetton: JettonInfo {
                name: m.name.clone(),
                symbol: m.symbol.clone(),
                decimals: m.decimals,
                total_supply: m.total_supply.clone(),
                content_uri: m.content_uri.clone(),
            },
            admin: AdminInfo {
                // Vérification simplifiée : une forme brute non vide qui
                // n'est pas une adresse conviviale désigne un contrat.
                is_contract: !m.admin_address.is_empty()
                    && !m.admin_address.starts_with('E'),
                address: m.admin_address.clone(),
            },
            flags: FlagsInfo {
                mintable: m.mintable,
                verified_by_interface: m.interface_verified,
                known_code_hash: m.known_fingerprint,
            },
            meta: MetaInfo {
                block_unixtime: self.block_unixtime,
                indexer_unixtime: m.detected_at.timestamp(),
                latency_ms: m.latency_ms,
                minter_type: m.minter_type.clone(),
            },
            links: LinksInfo {
                tonviewer: format!("{}{}", TONVIEWER_BASE, address),
                tonscan: format!("{}{}", TONSCAN_BASE, address),
                dexscreener: format!("{}{}", DEXSCREENER_BASE, address),
            },
        }
    }

    /// Résumé du statut de vérification, partagé par la console et le chat.
    pub fn status_line(&self) -> &'static str {
        match (self.meta.interface_verified, self.meta.known_fingerprint) {
            (true, true) => "✅ Vérifié (code connu + interface)",
            (true, false) => "⚠️ Nouveau type (interface OK)",
            (false, true) => "✓ Code connu",
            (false, false) => "❓ Inconnu",
        }
    }
}

/// Tronque un hash pour l'affichage humain.
pub fn truncate_hash(hash: &str) -> String {
    if hash.len() <= 20 {
        hash.to_string()
    } else {
        format!("{}...{}", &hash[..8], &hash[hash.len() - 8..])
    }
}

/// Échappe les caractères réservés du Markdown Telegram.
pub fn escape_markdown(s: &str) -> String {
    if s.is_empty() {
        return "-".to_string();
    }
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ton::AccountAddress;
    use chrono::Utc;

    pub(crate) fn sample_event() -> DiscoveryEvent {
        DiscoveryEvent {
            meta: MinterMetadata {
                address: AccountAddress::new(0, [0xab; 32]),
                code_fingerprint: "cd".repeat(32),
                total_supply: "340282366920938463463374607431768211457".to_string(),
                mintable: true,
                admin_address: format!("0:{}", "11".repeat(32)),
                content_uri: "https://ex/m.json".to_string(),
                name: "Jeton".to_string(),
                symbol: "JTN".to_string(),
                decimals: 9,
                known_fingerprint: false,
                interface_verified: true,
                latency_ms: 1234,
                detected_at: Utc::now(),
                minter_type: "Interface-Verified (Unknown Code)".to_string(),
            },
            seqno: 100,
            workchain: 0,
            tx_hash: Some("ff".repeat(32)),
            tx_lt: 777,
            block_unixtime: 1_700_000_000,
        }
    }

    #[test]
    fn webhook_payload_shape() {
        let event = sample_event();
        let json = serde_json::to_value(event.webhook_payload()).unwrap();

        assert_eq!(json["event"], "jetton_minter_deployed");
        assert_eq!(json["seqno"], 100);
        assert_eq!(json["flags"]["verified_by_interface"], true);
        assert_eq!(json["flags"]["known_code_hash"], false);
        // Les gros nombres restent des chaînes décimales, jamais des flottants.
        assert_eq!(
            json["jetton"]["total_supply"],
            "340282366920938463463374607431768211457"
        );
        assert!(json["links"]["dexscreener"]
            .as_str()
            .unwrap()
            .starts_with(DEXSCREENER_BASE));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let mut event = sample_event();
        event.tx_hash = None;
        event.tx_lt = 0;
        event.meta.content_uri = String::new();
        let json = serde_json::to_value(event.webhook_payload()).unwrap();
        assert!(json.get("tx_hash").is_none());
        assert!(json.get("tx_lt").is_none());
        assert!(json["jetton"].get("content_uri").is_none());
    }

    #[test]
    fn markdown_escaping() {
        assert_eq!(escape_markdown(""), "-");
        assert_eq!(escape_markdown("a_b"), "a\\_b");
        assert_eq!(escape_markdown("[x](y)"), "\\[x\\]\\(y\\)");
    }

    #[test]
    fn hash_truncation() {
        assert_eq!(truncate_hash("court"), "court");
        let long = "ab".repeat(32);
        let t = truncate_hash(&long);
        assert!(t.starts_with("abababab"));
        assert!(t.contains("..."));
        assert_eq!(t.len(), 19);
    }
}
