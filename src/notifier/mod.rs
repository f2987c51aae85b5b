// DANS : src/notifier/mod.rs

pub mod console;
pub mod payload;
pub mod telegram;
pub mod webhook;

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::config::Config;
use crate::monitoring::metrics;
pub use payload::DiscoveryEvent;

const SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// Une sortie de notification. Chaque livraison est bornée dans le temps et
/// isolée : l'échec d'une sortie n'affecte pas ses voisines.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, event: &DiscoveryEvent) -> Result<()>;
}

/// Éventail de sorties configurées : console toujours, chat et webhook selon
/// la configuration.
pub struct Notifier {
    sinks: Vec<Box<dyn Sink>>,
    sink_timeout: Duration,
}

impl Notifier {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(console::ConsoleSink)];

        if !cfg.notifier.tg_bot_token.is_empty() && !cfg.notifier.tg_chat_id.is_empty() {
            sinks.push(Box::new(telegram::TelegramSink::new(
                cfg.notifier.tg_bot_token.clone(),
                cfg.notifier.tg_chat_id.clone(),
            )?));
            info!(chat_id = cfg.notifier.tg_chat_id.as_str(), "sortie Telegram activée");
        } else {
            info!("sortie Telegram désactivée (jeton ou chat_id absent)");
        }

        if !cfg.notifier.webhook_url.is_empty() {
            sinks.push(Box::new(webhook::WebhookSink::new(
                cfg.notifier.webhook_url.clone(),
            )?));
            info!(url = cfg.notifier.webhook_url.as_str(), "sortie webhook activée");
        }

        Ok(Self { sinks, sink_timeout: SINK_TIMEOUT })
    }

    /// Constructeur direct, utilisé par les tests avec des sorties factices.
    pub fn with_sinks(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks, sink_timeout: SINK_TIMEOUT }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Livre l'événement à toutes les sorties en parallèle. Chaque échec est
    /// journalisé en avertissement, jamais remonté : une découverte ratée en
    /// aval ne doit pas freiner l'ingestion.
    pub async fn dispatch(&self, event: &DiscoveryEvent) {
        let deliveries = self.sinks.iter().map(|sink| async {
            let started = Instant::now();
            let result = tokio::time::timeout(self.sink_timeout, sink.deliver(event)).await;
            metrics::SINK_LATENCY
                .with_label_values(&[sink.name()])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Ok(Ok(())) => {
                    metrics::SINK_DELIVERIES
                        .with_label_values(&[sink.name(), "success"])
                        .inc();
                }
                Ok(Err(e)) => {
                    metrics::SINK_DELIVERIES
                        .with_label_values(&[sink.name(), "failure"])
                        .inc();
                    warn!(sortie = sink.name(), erreur = %e, "livraison échouée");
                }
                Err(_) => {
                    metrics::SINK_DELIVERIES
                        .with_label_values(&[sink.name(), "timeout"])
                        .inc();
                    warn!(sortie = sink.name(), "livraison hors délai");
                }
            }
        });
        join_all(deliveries).await;
    }
}
