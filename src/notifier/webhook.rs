// DANS : src/notifier/webhook.rs

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::payload::{DiscoveryEvent, EVENT_HEADER, EVENT_NAME};
use super::Sink;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sortie webhook : JSON complet POSTé vers le consommateur de trading.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("construction du client webhook impossible")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &DiscoveryEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(EVENT_HEADER, EVENT_NAME)
            .json(&event.webhook_payload())
            .send()
            .await
            .context("envoi du webhook échoué")?;

        if response.status().as_u16() >= 300 {
            bail!("webhook a répondu {}", response.status());
        }
        Ok(())
    }
}
