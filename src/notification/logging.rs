//! A channel that delivers alerts to the application log.
//!
//! Useful as a default destination and for debugging the dispatch pipeline.

use crate::core::{Alert, AlertChannel};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct LoggingChannel {
    delivered: AtomicU64,
}

impl LoggingChannel {
    pub const NAME: &'static str = "log";

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of alerts this channel has logged.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AlertChannel for LoggingChannel {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        info!(
            alert_id = alert.id,
            title = %alert.title,
            content = %alert.content,
            "Alert delivered to log"
        );
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
