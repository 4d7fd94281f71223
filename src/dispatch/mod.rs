//! The polling loop that hands pending alerts to dispatchers.
//!
//! Every iteration pauses for a random whole number of seconds, fetches the
//! pending backlog and, if it is not empty, builds one [`Dispatcher`] for
//! the batch and awaits it. Cooperating processes run the same loop against
//! the same backlog; the per-alert lock taken by the dispatcher keeps them
//! from delivering an alert twice.

pub mod sender;

use crate::config::DispatchConfig;
use crate::core::{Alert, AlertRepository};
use crate::internal_metrics::Metrics;
use crate::lock::DistributedLock;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

pub use sender::{AlertSender, AlertSenderFactory, DispatchSummary};

/// Everything a dispatcher needs for one batch.
pub struct DispatchCycle {
    pub alerts: Vec<Alert>,
    pub repository: Arc<dyn AlertRepository>,
    pub lock: Arc<dyn DistributedLock>,
}

impl std::fmt::Debug for DispatchCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCycle")
            .field("alerts", &self.alerts.len())
            .finish_non_exhaustive()
    }
}

/// Processes one batch of pending alerts.
#[async_trait]
pub trait Dispatcher: Send {
    async fn run(&mut self) -> anyhow::Result<DispatchSummary>;
}

/// Builds a dispatcher for each non-empty batch.
pub trait DispatcherFactory: Send + Sync {
    fn create(&self, cycle: DispatchCycle) -> Box<dyn Dispatcher>;
}

/// What a single loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The backlog was empty; no dispatcher was built.
    Idle,
    /// A dispatcher processed the batch.
    Dispatched(DispatchSummary),
    /// The repository could not be read.
    FetchFailed,
    /// The dispatcher returned an error.
    DispatchFailed,
}

pub struct DispatchLoop {
    repository: Arc<dyn AlertRepository>,
    lock: Arc<dyn DistributedLock>,
    factory: Arc<dyn DispatcherFactory>,
    config: DispatchConfig,
    metrics: Arc<Metrics>,
}

impl DispatchLoop {
    pub fn new(
        repository: Arc<dyn AlertRepository>,
        lock: Arc<dyn DistributedLock>,
        factory: Arc<dyn DispatcherFactory>,
        config: DispatchConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            lock,
            factory,
            config,
            metrics,
        }
    }

    /// Runs until the shutdown flag is set.
    ///
    /// The flag is checked once at the top of each iteration, so an
    /// in-progress pause, fetch or dispatch always completes first.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!(
            max_jitter_seconds = self.config.max_jitter_seconds,
            "Dispatch loop started"
        );
        while !*shutdown_rx.borrow() {
            let pause = self.jitter();
            debug!(pause_seconds = pause.as_secs(), "Pausing before next poll");
            tokio::time::sleep(pause).await;
            self.run_cycle().await;
        }
        info!("Dispatch loop stopped");
    }

    /// Random pause in `[0, max_jitter_seconds]` whole seconds.
    fn jitter(&self) -> Duration {
        let seconds = rand::rng().random_range(0..=self.config.max_jitter_seconds);
        Duration::from_secs(seconds)
    }

    /// One fetch-and-dispatch step, without the preceding pause.
    #[instrument(skip_all)]
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = std::time::Instant::now();

        let alerts = match self.repository.list_pending().await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(error = %e, "Failed to fetch pending alerts");
                self.metrics.increment_dispatch_cycle("fetch_failed");
                return CycleOutcome::FetchFailed;
            }
        };

        if alerts.is_empty() {
            debug!("No pending alerts");
            self.metrics.increment_dispatch_cycle("idle");
            return CycleOutcome::Idle;
        }

        let count = alerts.len();
        info!(count, "Dispatching pending alerts");
        let mut dispatcher = self.factory.create(DispatchCycle {
            alerts,
            repository: self.repository.clone(),
            lock: self.lock.clone(),
        });

        let outcome = match dispatcher.run().await {
            Ok(summary) => {
                info!(
                    count,
                    sent = summary.sent,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    errored = summary.errored,
                    "Dispatch finished"
                );
                self.metrics.increment_dispatch_cycle("dispatched");
                CycleOutcome::Dispatched(summary)
            }
            Err(e) => {
                error!(count, error = %e, "Dispatcher failed");
                self.metrics.increment_dispatch_cycle("dispatch_failed");
                CycleOutcome::DispatchFailed
            }
        };
        self.metrics
            .dispatch_cycle_duration_seconds
            .record(started.elapsed());
        outcome
    }
}
