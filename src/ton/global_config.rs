// DANS : src/ton/global_config.rs
//
// Récupération de la liste des liteservers depuis le config global TON,
// plus le format de descripteur manuel `ip:port:clé_base64` du fichier
// de configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tracing::info;

pub const MAINNET_CONFIG_URL: &str = "https://ton.org/global-config.json";
pub const TESTNET_CONFIG_URL: &str = "https://ton.org/testnet-global.config.json";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Point d'accès liteserver résolu : adresse TCP et clé publique ed25519.
#[derive(Debug, Clone)]
pub struct LiteserverEndpoint {
    pub addr: String,
    pub public_key: [u8; 32],
}

#[derive(Debug, Deserialize)]
struct GlobalConfig {
    liteservers: Vec<ConfigLiteserver>,
}

#[derive(Debug, Deserialize)]
struct ConfigLiteserver {
    ip: i64,
    port: u16,
    id: ConfigKey,
}

#[derive(Debug, Deserialize)]
struct ConfigKey {
    #[serde(rename = "@type")]
    #[allow(dead_code)]
    typ: String,
    key: String,
}

/// URL du config global selon le réseau.
pub fn config_url(network: &str) -> &'static str {
    if network == "testnet" {
        TESTNET_CONFIG_URL
    } else {
        MAINNET_CONFIG_URL
    }
}

/// Télécharge le config global et en extrait les liteservers.
pub async fn fetch_endpoints(url: &str) -> Result<Vec<LiteserverEndpoint>> {
    info!(url = url, "téléchargement du config global TON");

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("construction du client HTTP impossible")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("téléchargement de {} échoué", url))?;
    if !response.status().is_success() {
        bail!("config global: statut HTTP {}", response.status());
    }

    let config: GlobalConfig = response
        .json()
        .await
        .context("config global illisible")?;

    let mut endpoints = Vec::with_capacity(config.liteservers.len());
    for ls in config.liteservers {
        // L'adresse IPv4 est publiée comme entier signé 32 bits.
        let ip = Ipv4Addr::from(ls.ip as u32);
        endpoints.push(LiteserverEndpoint {
            addr: format!("{}:{}", ip, ls.port),
            public_key: decode_key(&ls.id.key)?,
        });
    }
    if endpoints.is_empty() {
        bail!("config global sans liteserver");
    }

    info!(count = endpoints.len(), "liteservers découverts");
    Ok(endpoints)
}

/// Analyse un descripteur manuel `ip:port:clé_base64`.
pub fn parse_endpoint_descriptor(raw: &str) -> Result<LiteserverEndpoint> {
    let mut parts = raw.splitn(3, ':');
    let (ip, port, key) = match (parts.next(), parts.next(), parts.next()) {
        (Some(ip), Some(port), Some(key)) => (ip, port, key),
        _ => bail!("descripteur liteserver invalide: {}", raw),
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("port invalide dans {}", raw))?;
    Ok(LiteserverEndpoint {
        addr: format!("{}:{}", ip, port),
        public_key: decode_key(key)?,
    })
}

fn decode_key(b64: &str) -> Result<[u8; 32]> {
    let raw = STANDARD
        .decode(b64)
        .with_context(|| format!("clé base64 invalide: {}", b64))?;
    if raw.len() != 32 {
        bail!("clé de liteserver de {} octets", raw.len());
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&raw);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parses() {
        let b64 = STANDARD.encode([0x42u8; 32]);
        let ep = parse_endpoint_descriptor(&format!("135.181.0.1:4924:{}", b64)).unwrap();
        assert_eq!(ep.addr, "135.181.0.1:4924");
        assert_eq!(ep.public_key, [0x42; 32]);
    }

    #[test]
    fn descriptor_rejects_bad_forms() {
        assert!(parse_endpoint_descriptor("1.2.3.4").is_err());
        assert!(parse_endpoint_descriptor("1.2.3.4:notaport:aaaa").is_err());
        assert!(parse_endpoint_descriptor("1.2.3.4:4924:pas-du-base64!").is_err());
    }

    #[test]
    fn network_urls() {
        assert_eq!(config_url("mainnet"), MAINNET_CONFIG_URL);
        assert_eq!(config_url("testnet"), TESTNET_CONFIG_URL);
    }

    #[test]
    fn signed_ip_renders_as_ipv4() {
        // Les IP du config global sont publiées comme entiers signés.
        let ip = Ipv4Addr::from((-1185526007i64) as u32);
        assert_eq!(ip.to_string(), "185.86.79.9");
        let ip = Ipv4Addr::from(16909060i64 as u32);
        assert_eq!(ip.to_string(), "1.2.3.4");
    }
}
