// DANS : src/notifier/telegram.rs

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::payload::{escape_markdown, DiscoveryEvent, TONSCAN_BASE, TONVIEWER_BASE};
use super::Sink;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sortie chat : message Markdown envoyé via l'API Bot de Telegram.
pub struct TelegramSink {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramSink {
    pub fn new(token: String, chat_id: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("construction du client Telegram impossible")?;
        Ok(Self { token, chat_id, client })
    }

    fn message_text(event: &DiscoveryEvent) -> String {
        let m = &event.meta;
        let address = m.address.canonical();
        let mut text = String::with_capacity(512);

        text.push_str("🚀 *JETTON MINTER*\n\n");
        if !m.name.is_empty() || !m.symbol.is_empty() {
            text.push_str(&format!("📝 *Nom :* {}\n", escape_markdown(&m.name)));
            text.push_str(&format!("🏷️ *Ticker :* {}\n", escape_markdown(&m.symbol)));
        }
        text.push_str(&format!("📍 *Adresse :* `{}`\n", address));
        text.push_str(&format!("🔧 *Type :* {}\n", escape_markdown(&m.minter_type)));
        text.push_str(&format!("📊 *Statut :* {}\n", event.status_line()));
        text.push_str(&format!("⚡ *Latence :* {} ms\n\n", m.latency_ms));
        text.push_str(&format!(
            "🔍 [Tonviewer]({}{}) | [Tonscan]({}{})\n\n",
            TONVIEWER_BASE, address, TONSCAN_BASE, address
        ));
        text.push_str(&format!("⏱️ {}", m.detected_at.format("%H:%M:%S UTC")));
        text
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, event: &DiscoveryEvent) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let text = Self::message_text(event);
        let form = [
            ("chat_id", self.chat_id.as_str()),
            ("text", text.as_str()),
            ("parse_mode", "Markdown"),
            ("disable_web_page_preview", "true"),
        ];

        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("envoi Telegram échoué")?;

        if response.status().as_u16() >= 300 {
            bail!("Telegram a répondu {}", response.status());
        }
        Ok(())
    }
}
