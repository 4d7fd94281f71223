//! The default dispatcher: claims, delivers and records each alert.

use super::{DispatchCycle, Dispatcher, DispatcherFactory};
use crate::core::{Alert, AlertStatus};
use crate::internal_metrics::Metrics;
use crate::notification::ChannelRouter;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Per-batch counts reported by a dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Alerts abandoned because the repository could not be read or updated.
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Failed,
    Skipped,
}

/// Delivers a batch one alert at a time.
///
/// For each alert the sender claims `/alert-<id>` without waiting; an alert
/// claimed by another process is skipped. Once claimed, the status is read
/// again so an alert finished by someone else since the batch was fetched is
/// not delivered twice. The lock is released whatever the outcome. A
/// repository error abandons only the alert it occurred on; the rest of the
/// batch is still processed.
pub struct AlertSender {
    cycle: DispatchCycle,
    router: Arc<ChannelRouter>,
    metrics: Arc<Metrics>,
}

impl AlertSender {
    pub fn new(cycle: DispatchCycle, router: Arc<ChannelRouter>, metrics: Arc<Metrics>) -> Self {
        Self {
            cycle,
            router,
            metrics,
        }
    }

    async fn process(&self, alert: &Alert) -> Result<Outcome> {
        let path = alert.lock_path();
        if !self.cycle.lock.try_acquire(&path).await {
            debug!(alert_id = alert.id, "Alert is claimed elsewhere, skipping");
            return Ok(Outcome::Skipped);
        }

        let outcome = self.deliver_claimed(alert).await;

        if !self.cycle.lock.release_lock(&path).await {
            warn!(alert_id = alert.id, path = %path, "Failed to release alert lock");
        }
        outcome
    }

    async fn deliver_claimed(&self, alert: &Alert) -> Result<Outcome> {
        let status = self.cycle.repository.fetch_status(alert.id).await?;
        if status != Some(AlertStatus::Waiting) {
            debug!(alert_id = alert.id, ?status, "Alert is no longer waiting, skipping");
            return Ok(Outcome::Skipped);
        }

        match self.router.deliver(alert).await {
            Ok(()) => {
                let log = format!("delivered via {}", alert.channel);
                self.cycle
                    .repository
                    .update_status(alert.id, AlertStatus::Success, &log)
                    .await?;
                info!(alert_id = alert.id, channel = %alert.channel, "Alert sent");
                Ok(Outcome::Sent)
            }
            Err(e) => {
                warn!(alert_id = alert.id, error = %e, "Alert delivery failed");
                self.cycle
                    .repository
                    .update_status(alert.id, AlertStatus::Failed, &e.to_string())
                    .await?;
                Ok(Outcome::Failed)
            }
        }
    }
}

#[async_trait]
impl Dispatcher for AlertSender {
    #[instrument(skip_all, fields(batch = self.cycle.alerts.len()))]
    async fn run(&mut self) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        for alert in &self.cycle.alerts {
            match self.process(alert).await {
                Ok(Outcome::Sent) => {
                    summary.sent += 1;
                    self.metrics.alerts_sent_total.increment(1);
                }
                Ok(Outcome::Failed) => {
                    summary.failed += 1;
                    self.metrics.alerts_failed_total.increment(1);
                }
                Ok(Outcome::Skipped) => {
                    summary.skipped += 1;
                    self.metrics.alerts_skipped_total.increment(1);
                }
                Err(e) => {
                    error!(alert_id = alert.id, error = %e, "Alert processing failed");
                    summary.errored += 1;
                    self.metrics.alerts_errored_total.increment(1);
                }
            }
        }
        Ok(summary)
    }
}

/// Builds an [`AlertSender`] per batch, sharing one channel router.
#[derive(Debug)]
pub struct AlertSenderFactory {
    router: Arc<ChannelRouter>,
    metrics: Arc<Metrics>,
}

impl AlertSenderFactory {
    pub fn new(router: Arc<ChannelRouter>, metrics: Arc<Metrics>) -> Self {
        Self { router, metrics }
    }
}

impl DispatcherFactory for AlertSenderFactory {
    fn create(&self, cycle: DispatchCycle) -> Box<dyn Dispatcher> {
        Box::new(AlertSender::new(
            cycle,
            self.router.clone(),
            self.metrics.clone(),
        ))
    }
}
