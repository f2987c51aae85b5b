// DANS : src/ton/address.rs

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Serialize, Serializer};

/// Adresse de compte sous forme brute `workchain:hex`.
///
/// La forme canonique (hex minuscule) sert partout : égalité, clés Redis,
/// charges utiles sortantes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress {
    pub workchain: i32,
    pub id: [u8; 32],
}

impl AccountAddress {
    pub fn new(workchain: i32, id: [u8; 32]) -> Self {
        Self { workchain, id }
    }

    /// Forme canonique `workchain:hex` en minuscules.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.id))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for AccountAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (wc, hex_part) = s
            .split_once(':')
            .with_context(|| format!("adresse sans séparateur: {}", s))?;
        let workchain: i32 = wc
            .parse()
            .with_context(|| format!("workchain invalide: {}", wc))?;
        let raw = hex::decode(hex_part.to_ascii_lowercase())
            .with_context(|| format!("hex invalide: {}", hex_part))?;
        if raw.len() != 32 {
            bail!("identifiant de compte de {} octets", raw.len());
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&raw);
        Ok(Self { workchain, id })
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_is_lowercase() {
        let addr: AccountAddress = "0:ABCDEF0000000000000000000000000000000000000000000000000000000012"
            .parse()
            .unwrap();
        assert_eq!(
            addr.canonical(),
            "0:abcdef0000000000000000000000000000000000000000000000000000000012"
        );
    }

    #[test]
    fn masterchain_workchain_parses() {
        let addr: AccountAddress =
            "-1:0000000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        assert_eq!(addr.workchain, -1);
        assert_eq!(addr.id[31], 1);
    }

    #[test]
    fn rejects_malformed() {
        assert!("abcdef".parse::<AccountAddress>().is_err());
        assert!("0:12".parse::<AccountAddress>().is_err());
        assert!("x:ab".parse::<AccountAddress>().is_err());
    }

    #[test]
    fn equality_ignores_input_case() {
        let a: AccountAddress = "0:aa00000000000000000000000000000000000000000000000000000000000000"
            .parse()
            .unwrap();
        let b: AccountAddress = "0:AA00000000000000000000000000000000000000000000000000000000000000"
            .parse()
            .unwrap();
        assert_eq!(a, b);
    }
}
