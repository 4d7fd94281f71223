//! # Internal Metrics Module
//!
//! Collection and exposure of application metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: The entry point for initializing the metrics system.
//!   It installs the Prometheus recorder, binds the listener for the metrics
//!   server and constructs the `Metrics` handle.
//!
//! - **`Metrics`**: A lightweight, cloneable struct that serves as the public
//!   API for the rest of the application to interact with the metrics system.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.
//!
//! The lock backend records `lock_acquire_total` and `lock_release_total`
//! directly through the `metrics` macros; they are described here so the
//! exporter carries their help text.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use anyhow::{Context, Result};
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// The public API for the metrics system.
///
/// This struct holds cloneable handles to the metrics collectors.
#[derive(Clone)]
pub struct Metrics {
    pub alerts_sent_total: Counter,
    pub alerts_failed_total: Counter,
    pub alerts_skipped_total: Counter,
    pub alerts_errored_total: Counter,
    pub dispatch_cycle_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("dispatch_cycles_total", Unit::Count, "Total number of dispatch loop iterations, labeled by outcome.");
        metrics::describe_counter!("alerts_sent_total", Unit::Count, "Total number of alerts delivered successfully.");
        metrics::describe_counter!("alerts_failed_total", Unit::Count, "Total number of alerts whose delivery failed.");
        metrics::describe_counter!("alerts_skipped_total", Unit::Count, "Total number of alerts skipped because another process claimed them or they were no longer waiting.");
        metrics::describe_counter!("alerts_errored_total", Unit::Count, "Total number of alerts abandoned in a batch because of a repository error.");
        metrics::describe_counter!("lock_acquire_total", Unit::Count, "Total number of lock acquisition attempts, labeled by outcome.");
        metrics::describe_counter!("lock_release_total", Unit::Count, "Total number of lock nodes deleted by a release.");
        metrics::describe_histogram!("dispatch_cycle_duration_seconds", Unit::Seconds, "Time spent fetching and dispatching one batch, excluding the jitter pause.");

        Self {
            alerts_sent_total: metrics::counter!("alerts_sent_total"),
            alerts_failed_total: metrics::counter!("alerts_failed_total"),
            alerts_skipped_total: metrics::counter!("alerts_skipped_total"),
            alerts_errored_total: metrics::counter!("alerts_errored_total"),
            dispatch_cycle_duration_seconds: metrics::histogram!("dispatch_cycle_duration_seconds"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    /// Used when metrics are disabled in the configuration.
    pub fn disabled() -> Self {
        Self {
            alerts_sent_total: Counter::noop(),
            alerts_failed_total: Counter::noop(),
            alerts_skipped_total: Counter::noop(),
            alerts_errored_total: Counter::noop(),
            dispatch_cycle_duration_seconds: Histogram::noop(),
        }
    }

    /// Increments the dispatch cycle counter for the given outcome.
    pub fn increment_dispatch_cycle(&self, outcome: &'static str) {
        metrics::counter!("dispatch_cycles_total", "outcome" => outcome).increment(1);
    }

    /// Creates a `Metrics` instance suitable for testing: no-op handles that
    /// never touch the global recorder.
    pub fn new_for_test() -> Self {
        Self::disabled()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder` with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer` together with its bound address.
    ///
    /// If metrics are disabled in the configuration, this method returns a
    /// disabled `Metrics` instance and `None` for the server. Failing to bind
    /// the listener or install the recorder is a startup error.
    pub async fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Metrics, Option<(MetricsServer, SocketAddr)>)> {
        if !self.config.enabled {
            return Ok((Metrics::disabled(), None));
        }

        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .context("invalid histogram buckets")?
            .build_recorder();
        let handle = recorder.handle();

        let listener = TcpListener::bind(self.config.listen_address)
            .await
            .with_context(|| {
                format!(
                    "failed to bind metrics server to {}",
                    self.config.listen_address
                )
            })?;
        let addr = listener
            .local_addr()
            .context("failed to get local address for metrics server")?;

        metrics::set_global_recorder(recorder)
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
        info!(%addr, "Metrics server listening");

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, shutdown_rx);

        Ok((metrics, Some((server, addr))))
    }
}

pub mod server;
