// DANS : src/registry.rs

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::warn;

// Empreintes de code des implémentations de minter connues. La liste embarquée
// sert d'amorçage ; `app.known_code_hashes` peut l'étendre au démarrage.
const SEED_FINGERPRINTS: &[(&str, &str)] = &[
    ("6d9f5c5d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b", "Official TON Jetton 2.0"),
    ("f4a6c118c7a2a4e3f8d2b4e6c8a0f2d4e6c8a0f2d4e6c8a0f2d4e6c8a0f2d4e6", "Old official"),
    ("83fbdc8e3a47a75e8a7b7c7e5f6a4d3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7", "Discoverable variant"),
    ("a3c4d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b3c", "Broxus legacy"),
    ("2b4c5d6e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9d0e1f2a3b4", "Stablecoin variant"),
    ("e7f8a9b0c1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7", "Notcoin-style"),
];

/// Registre en mémoire des empreintes de code connues. Lectures fréquentes,
/// écritures rares (auto-vérification) ; jamais de suppression.
pub struct FingerprintRegistry {
    entries: RwLock<HashMap<String, String>>,
}

impl FingerprintRegistry {
    /// Amorce le registre avec la liste embarquée plus les entrées de
    /// configuration (`empreinte_hex` ou `empreinte_hex:étiquette`).
    pub fn new(extra: &[String]) -> Self {
        let mut entries: HashMap<String, String> = SEED_FINGERPRINTS
            .iter()
            .map(|(fp, label)| (fp.to_string(), label.to_string()))
            .collect();

        for raw in extra {
            let (fp, label) = match raw.split_once(':') {
                Some((fp, label)) => (fp, label),
                None => (raw.as_str(), "Config-Provided"),
            };
            let fp = fp.trim().to_lowercase();
            if fp.len() != 64 || !fp.bytes().all(|b| b.is_ascii_hexdigit()) {
                warn!(empreinte = raw.as_str(), "empreinte de config ignorée (hex attendu)");
                continue;
            }
            entries.insert(fp, label.trim().to_string());
        }

        Self { entries: RwLock::new(entries) }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .contains_key(&fingerprint.to_lowercase())
    }

    pub fn label(&self, fingerprint: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap()
            .get(&fingerprint.to_lowercase())
            .cloned()
    }

    /// Enregistre une empreinte vérifiée par interface, avec une étiquette
    /// datée. Sans effet si l'empreinte est déjà connue ; renvoie `true` si
    /// l'insertion a eu lieu.
    pub fn note_auto_verified(&self, fingerprint: &str) -> bool {
        let key = fingerprint.to_lowercase();
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&key) {
            return false;
        }
        let label = format!("auto_verified_{}", Utc::now().format("%Y-%m-%d"));
        entries.insert(key, label);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_list_is_recognized() {
        let reg = FingerprintRegistry::new(&[]);
        assert!(reg.contains(
            "6d9f5c5d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b"
        ));
        assert!(!reg.contains("deadbeef"));
        assert_eq!(
            reg.label("6d9f5c5d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b")
                .as_deref(),
            Some("Official TON Jetton 2.0")
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = FingerprintRegistry::new(&[]);
        assert!(reg.contains(
            "6D9F5C5D5E6F7A8B9C0D1E2F3A4B5C6D7E8F9A0B1C2D3E4F5A6B7C8D9E0F1A2B"
        ));
    }

    #[test]
    fn config_entries_extend_the_seed() {
        let extra = vec![
            format!("{}:Mon Minter", "ab".repeat(32)),
            "pas une empreinte".to_string(),
        ];
        let reg = FingerprintRegistry::new(&extra);
        assert_eq!(reg.label(&"ab".repeat(32)).as_deref(), Some("Mon Minter"));
        assert_eq!(reg.len(), SEED_FINGERPRINTS.len() + 1);
    }

    #[test]
    fn auto_verified_is_idempotent() {
        let reg = FingerprintRegistry::new(&[]);
        let fp = "cd".repeat(32);

        assert!(reg.note_auto_verified(&fp));
        let label = reg.label(&fp).unwrap();
        assert!(label.starts_with("auto_verified_"));

        // Second appel : aucun effet, l'étiquette ne bouge pas.
        assert!(!reg.note_auto_verified(&fp));
        assert_eq!(reg.label(&fp).unwrap(), label);
    }

    #[test]
    fn auto_verified_never_overwrites_seed() {
        let reg = FingerprintRegistry::new(&[]);
        let fp = "6d9f5c5d5e6f7a8b9c0d1e2f3a4b5c6d7e8f9a0b1c2d3e4f5a6b7c8d9e0f1a2b";
        assert!(!reg.note_auto_verified(fp));
        assert_eq!(reg.label(fp).as_deref(), Some("Official TON Jetton 2.0"));
    }
}
