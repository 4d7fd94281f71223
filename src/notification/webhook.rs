//! A channel that posts alerts to an HTTP webhook.

use crate::config::WebhookConfig;
use crate::core::{Alert, AlertChannel};
use crate::formatting::TextFormatter;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Posts `{ "text": <formatted alert> }` to a webhook URL.
pub struct WebhookChannel {
    name: String,
    webhook_url: String,
    formatter: Box<dyn TextFormatter>,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Creates a new `WebhookChannel`.
    pub fn new(config: &WebhookConfig, formatter: Box<dyn TextFormatter>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            name: config.name.clone(),
            webhook_url: config.url.clone(),
            formatter,
            client,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    /// Formats and sends an alert to the configured webhook.
    #[instrument(skip_all, fields(alert_id = alert.id, channel = %self.name))]
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let payload = json!({ "text": self.formatter.format(alert) });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request to webhook failed");
                e
            })?;

        let status = response.status();
        if status.is_success() {
            info!("Successfully sent alert to webhook.");
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Webhook rejected alert");
            anyhow::bail!("webhook returned status {}, body: {}", status, text);
        }
    }
}
