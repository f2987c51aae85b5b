// DANS : src/notifier/console.rs

use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;

use super::payload::{truncate_hash, DiscoveryEvent, DEXSCREENER_BASE, TONSCAN_BASE, TONVIEWER_BASE};
use super::Sink;

/// Sortie console : bloc lisible par un humain, toujours active.
pub struct ConsoleSink;

#[async_trait]
impl Sink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn deliver(&self, event: &DiscoveryEvent) -> Result<()> {
        let m = &event.meta;
        let address = m.address.canonical();

        let mut out = String::with_capacity(1024);
        out.push('\n');
        out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║            🚀 NOUVEAU JETTON MINTER DÉTECTÉ ! 🚀             ║\n");
        out.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        if !m.name.is_empty() || !m.symbol.is_empty() {
            out.push_str(&format!("  Nom :      {} ({})\n", m.name, m.symbol));
        }
        out.push_str(&format!("  Adresse :  {}\n", address));
        out.push_str(&format!("  Type :     {}\n", m.minter_type));
        out.push_str(&format!("  Statut :   {}\n", event.status_line()));
        out.push_str(&format!("  CodeHash : {}\n", truncate_hash(&m.code_fingerprint)));

        if !m.total_supply.is_empty() {
            out.push_str(&format!("  Supply :   {}\n", m.total_supply));
        }
        if !m.admin_address.is_empty() {
            out.push_str(&format!("  Admin :    {}\n", truncate_hash(&m.admin_address)));
        }
        if m.mintable {
            out.push_str("  Mintable : oui\n");
        }

        out.push('\n');
        out.push_str(&format!("  📎 Tonviewer :   {}{}\n", TONVIEWER_BASE, address));
        out.push_str(&format!("  📎 Tonscan :     {}{}\n", TONSCAN_BASE, address));
        out.push_str(&format!("  📎 DexScreener : {}{}\n", DEXSCREENER_BASE, address));

        out.push('\n');
        out.push_str(&format!("  ⚡ Latence : {} ms\n", m.latency_ms));
        out.push_str(&format!(
            "  ⏱️ Heure :   {}\n",
            m.detected_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));

        println!("{}", out);
        Ok(())
    }
}
