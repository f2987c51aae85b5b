// DANS : src/verifier.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use num_traits::Zero;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::monitoring::metrics;
use crate::registry::FingerprintRegistry;
use crate::ton::cell::Cell;
use crate::ton::dict;
use crate::ton::tlb::load_msg_address;
use crate::ton::{AccountAddress, NodeView, StackValue};

const GET_JETTON_DATA: &str = "get_jetton_data";
const METHOD_DEADLINE: Duration = Duration::from_secs(3);
const DEFAULT_DECIMALS: u32 = 9;

/// Étiquette des minters reconnus uniquement par leur interface.
pub const UNKNOWN_CODE_LABEL: &str = "Interface-Verified (Unknown Code)";

/// Métadonnées d'un minter découvert, prêtes pour les sorties.
#[derive(Debug, Clone)]
pub struct MinterMetadata {
    pub address: AccountAddress,
    pub code_fingerprint: String,
    pub total_supply: String,
    pub mintable: bool,
    pub admin_address: String,
    pub content_uri: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub known_fingerprint: bool,
    pub interface_verified: bool,
    pub latency_ms: i64,
    pub detected_at: DateTime<Utc>,
    pub minter_type: String,
}

/// Vérificateur d'interface : confronte chaque déploiement candidat au
/// contrat de lecture `get_jetton_data`.
///
/// Le standard n'impose aucun bytecode : la seule liste blanche d'empreintes
/// raterait les nouvelles implémentations, et le bytecode seul ne prouve pas
/// le comportement. La sonde d'interface fait foi ; l'empreinte connue sert
/// d'étiquette et de second témoin.
pub struct InterfaceVerifier {
    registry: Arc<FingerprintRegistry>,
}

impl InterfaceVerifier {
    pub fn new(registry: Arc<FingerprintRegistry>) -> Self {
        Self { registry }
    }

    /// Inspecte un contrat fraîchement déployé. Renvoie `None` quand ni
    /// l'empreinte ni l'interface ne le désignent comme minter.
    pub async fn inspect(
        &self,
        session: &dyn NodeView,
        address: &AccountAddress,
        fingerprint: &str,
        block_utime: u32,
    ) -> Option<MinterMetadata> {
        let fingerprint = fingerprint.to_lowercase();
        let known_fingerprint = self.registry.contains(&fingerprint);

        let mut meta = MinterMetadata {
            address: *address,
            code_fingerprint: fingerprint.clone(),
            total_supply: String::new(),
            mintable: false,
            admin_address: String::new(),
            content_uri: String::new(),
            name: String::new(),
            symbol: String::new(),
            decimals: DEFAULT_DECIMALS,
            known_fingerprint,
            interface_verified: false,
            latency_ms: 0,
            detected_at: Utc::now(),
            minter_type: String::new(),
        };

        let call = tokio::time::timeout(
            METHOD_DEADLINE,
            session.run_get_method(address, GET_JETTON_DATA),
        )
        .await;

        match call {
            Ok(Ok(stack)) if stack.len() >= 4 => {
                meta.interface_verified = true;
                self.fill_from_stack(&mut meta, &stack);
            }
            Ok(Ok(stack)) => {
                debug!(adresse = %address, profondeur = stack.len(), "pile get_jetton_data trop courte");
            }
            Ok(Err(e)) => {
                debug!(adresse = %address, erreur = %e, "get_jetton_data a échoué");
            }
            Err(_) => {
                debug!(adresse = %address, "get_jetton_data hors délai");
            }
        }

        if !meta.known_fingerprint && !meta.interface_verified {
            return None;
        }

        let now = Utc::now();
        meta.detected_at = now;
        meta.latency_ms = (now.timestamp_millis() - block_utime as i64 * 1000).max(0);
        meta.minter_type = self
            .registry
            .label(&fingerprint)
            .unwrap_or_else(|| UNKNOWN_CODE_LABEL.to_string());

        metrics::DETECTION_LATENCY.observe(meta.latency_ms as f64 / 1000.0);
        Some(meta)
    }

    // Tuple déclaré : (total_supply, mintable, admin, content, wallet_code).
    fn fill_from_stack(&self, meta: &mut MinterMetadata, stack: &[StackValue]) {
        if let Some(supply) = stack[0].as_int() {
            meta.total_supply = supply.to_string();
        }
        if let Some(mintable) = stack[1].as_int() {
            // Le vrai canonique de TVM est -1 ; tout non-zéro compte.
            meta.mintable = !mintable.is_zero();
        }
        if let Some(mut admin) = stack[2].as_slice() {
            if let Ok(Some((wc, id))) = load_msg_address(&mut admin) {
                meta.admin_address = AccountAddress::new(wc, id).canonical();
            }
        }
        if let Some(content) = stack[3].as_cell() {
            parse_token_content(content, meta);
        }
    }
}

/// Décode la cellule de contenu TEP-64, best-effort : `0x01` URI hors
/// chaîne (format snake), `0x00` dictionnaire en chaîne indexé par le
/// sha256 des noms d'attributs. Les champs absents restent vides.
pub fn parse_token_content(content: &Cell, meta: &mut MinterMetadata) {
    let mut slice = content.as_slice();
    let prefix = match slice.load_u8() {
        Ok(p) => p,
        Err(_) => return,
    };

    match prefix {
        0x01 => {
            if let Ok(raw) = slice.load_snake_bytes() {
                meta.content_uri = String::from_utf8_lossy(&raw).trim().to_string();
            }
        }
        0x00 => {
            let root = match slice.load_bit() {
                Ok(true) => match slice.load_ref() {
                    Ok(root) => root,
                    Err(_) => return,
                },
                _ => return,
            };
            meta.name = onchain_attribute(&root, "name").unwrap_or_default();
            meta.symbol = onchain_attribute(&root, "symbol").unwrap_or_default();
            if let Some(raw) = onchain_attribute(&root, "decimals") {
                meta.decimals = raw.trim().parse().unwrap_or(DEFAULT_DECIMALS);
            }
            if let Some(uri) = onchain_attribute(&root, "uri") {
                meta.content_uri = uri;
            }
        }
        _ => {}
    }
}

// Valeur d'un attribut du dictionnaire TEP-64 : clé sha256(nom), valeur en
// référence, chaîne snake préfixée 0x00.
fn onchain_attribute(root: &Cell, name: &str) -> Option<String> {
    let key = dict::bytes_to_bits(&Sha256::digest(name.as_bytes()));
    let mut value = dict::get(root, &key).ok()??;
    let mut content = value.load_ref().ok()?.as_slice();
    if content.load_u8().ok()? != 0x00 {
        return None;
    }
    let raw = content.load_snake_bytes().ok()?;
    let text = String::from_utf8_lossy(&raw).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ton::cell::CellBuilder;

    fn empty_meta() -> MinterMetadata {
        MinterMetadata {
            address: AccountAddress::new(0, [0; 32]),
            code_fingerprint: String::new(),
            total_supply: String::new(),
            mintable: false,
            admin_address: String::new(),
            content_uri: String::new(),
            name: String::new(),
            symbol: String::new(),
            decimals: DEFAULT_DECIMALS,
            known_fingerprint: false,
            interface_verified: false,
            latency_ms: 0,
            detected_at: Utc::now(),
            minter_type: String::new(),
        }
    }

    fn snake_value(text: &[u8]) -> Cell {
        let mut inner = CellBuilder::new();
        inner.store_u8(0x00).unwrap();
        inner.store_bytes(text).unwrap();
        let inner = inner.build();
        let mut value = CellBuilder::new();
        value.store_ref(inner).unwrap();
        value.build()
    }

    #[test]
    fn offchain_uri_is_extracted() {
        let mut content = CellBuilder::new();
        content.store_u8(0x01).unwrap();
        content.store_bytes(b"https://example.org/meta.json  ").unwrap();
        let content = content.build();

        let mut meta = empty_meta();
        parse_token_content(&content, &mut meta);
        assert_eq!(meta.content_uri, "https://example.org/meta.json");
    }

    #[test]
    fn offchain_uri_follows_snake_refs() {
        let mut tail = CellBuilder::new();
        tail.store_bytes(b"meta.json").unwrap();
        let tail = tail.build();

        let mut content = CellBuilder::new();
        content.store_u8(0x01).unwrap();
        content.store_bytes(b"https://example.org/").unwrap();
        content.store_ref(tail).unwrap();
        let content = content.build();

        let mut meta = empty_meta();
        parse_token_content(&content, &mut meta);
        assert_eq!(meta.content_uri, "https://example.org/meta.json");
    }

    #[test]
    fn onchain_dictionary_fields() {
        let entries = vec![
            (
                dict::bytes_to_bits(&Sha256::digest(b"name")),
                snake_value(b"Mon Jeton"),
            ),
            (
                dict::bytes_to_bits(&Sha256::digest(b"symbol")),
                snake_value(b"MJT"),
            ),
            (
                dict::bytes_to_bits(&Sha256::digest(b"decimals")),
                snake_value(b"6"),
            ),
        ];
        let root = dict::build(&entries, 256).unwrap().unwrap();

        let mut content = CellBuilder::new();
        content.store_u8(0x00).unwrap();
        content.store_bit(true).unwrap();
        content.store_ref(root).unwrap();
        let content = content.build();

        let mut meta = empty_meta();
        parse_token_content(&content, &mut meta);
        assert_eq!(meta.name, "Mon Jeton");
        assert_eq!(meta.symbol, "MJT");
        assert_eq!(meta.decimals, 6);
    }

    #[test]
    fn missing_fields_keep_defaults() {
        let entries = vec![(
            dict::bytes_to_bits(&Sha256::digest(b"name")),
            snake_value(b"Sans Ticker"),
        )];
        let root = dict::build(&entries, 256).unwrap().unwrap();

        let mut content = CellBuilder::new();
        content.store_u8(0x00).unwrap();
        content.store_bit(true).unwrap();
        content.store_ref(root).unwrap();
        let content = content.build();

        let mut meta = empty_meta();
        parse_token_content(&content, &mut meta);
        assert_eq!(meta.name, "Sans Ticker");
        assert!(meta.symbol.is_empty());
        assert_eq!(meta.decimals, DEFAULT_DECIMALS);
    }

    #[test]
    fn unknown_prefix_is_ignored() {
        let mut content = CellBuilder::new();
        content.store_u8(0x42).unwrap();
        let content = content.build();

        let mut meta = empty_meta();
        parse_token_content(&content, &mut meta);
        assert!(meta.content_uri.is_empty());
        assert!(meta.name.is_empty());
    }

    #[test]
    fn garbage_decimals_fall_back_to_nine() {
        let entries = vec![(
            dict::bytes_to_bits(&Sha256::digest(b"decimals")),
            snake_value(b"beaucoup"),
        )];
        let root = dict::build(&entries, 256).unwrap().unwrap();

        let mut content = CellBuilder::new();
        content.store_u8(0x00).unwrap();
        content.store_bit(true).unwrap();
        content.store_ref(root).unwrap();
        let content = content.build();

        let mut meta = empty_meta();
        parse_token_content(&content, &mut meta);
        assert_eq!(meta.decimals, DEFAULT_DECIMALS);
    }
}
