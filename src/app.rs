//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    coordination::{memory::MemoryEnsemble, CoordinationClient},
    core::{AlertChannel, AlertRepository},
    dispatch::{AlertSenderFactory, DispatchLoop, DispatcherFactory},
    formatting::PlainTextFormatter,
    internal_metrics::{Metrics, MetricsBuilder},
    lock::{CoordinatedLock, DistributedLock},
    notification::{ChannelRouter, LoggingChannel, WebhookChannel},
    repository::MemoryAlertRepository,
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    lock: Arc<dyn DistributedLock>,
    metrics_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// The lock instance shared by the dispatch loop.
    pub fn lock(&self) -> Arc<dyn DistributedLock> {
        self.lock.clone()
    }

    /// Waits for the shutdown signal, lets every task finish its current
    /// unit of work, then closes the lock.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        // A dropped sender also ends the application.
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown().await;

        if let Err(e) = self.lock.close().await {
            error!(error = %e, "Failed to close lock client");
        }
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Separates constructing the application's components from running it, and
/// lets tests substitute any collaborator.
pub struct AppBuilder {
    config: Config,
    coordination_client_override: Option<Arc<dyn CoordinationClient>>,
    repository_override: Option<Arc<dyn AlertRepository>>,
    dispatcher_factory_override: Option<Arc<dyn DispatcherFactory>>,
    channels_override: Option<Vec<Arc<dyn AlertChannel>>>,
    metrics_override: Option<Metrics>,
}

impl AppBuilder {
    /// Creates a new `AppBuilder` with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            coordination_client_override: None,
            repository_override: None,
            dispatcher_factory_override: None,
            channels_override: None,
            metrics_override: None,
        }
    }

    /// Uses `client` instead of a session on a fresh in-process ensemble.
    pub fn coordination_client_override(mut self, client: Arc<dyn CoordinationClient>) -> Self {
        self.coordination_client_override = Some(client);
        self
    }

    /// Overrides the alert repository.
    pub fn repository_override(mut self, repository: Arc<dyn AlertRepository>) -> Self {
        self.repository_override = Some(repository);
        self
    }

    /// Overrides the dispatcher factory.
    pub fn dispatcher_factory_override(mut self, factory: Arc<dyn DispatcherFactory>) -> Self {
        self.dispatcher_factory_override = Some(factory);
        self
    }

    /// Overrides the delivery channels used by the default dispatcher.
    pub fn channels_override(mut self, channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        self.channels_override = Some(channels);
        self
    }

    /// Overrides the metrics system for testing.
    pub fn metrics_override(mut self, metrics: Metrics) -> Self {
        self.metrics_override = Some(metrics);
        self
    }

    /// Builds and initializes all application components, returning a runnable `App`.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Initialize Metrics
        // =========================================================================
        let (metrics, metrics_server_info) = match self.metrics_override {
            Some(m) => (m, None),
            None => {
                MetricsBuilder::new(config.metrics.clone())
                    .build(task_manager.get_shutdown_rx())
                    .await?
            }
        };
        let metrics = Arc::new(metrics);

        let metrics_addr = if let Some((server, addr)) = metrics_server_info {
            task_manager.spawn("MetricsServer", server.run());
            Some(addr)
        } else {
            None
        };

        // =========================================================================
        // 2. Distributed Lock
        // =========================================================================
        let client = match self.coordination_client_override {
            Some(client) => client,
            None => {
                debug!("Connecting to an in-process coordination ensemble");
                Arc::new(MemoryEnsemble::new().connect()) as Arc<dyn CoordinationClient>
            }
        };
        let lock: Arc<dyn DistributedLock> = Arc::new(
            CoordinatedLock::connect(client, &config.lock)
                .await
                .context("failed to initialize the distributed lock")?,
        );

        // =========================================================================
        // 3. Repository
        // =========================================================================
        let repository: Arc<dyn AlertRepository> = match self.repository_override {
            Some(repository) => repository,
            None => match &config.repository.seed_file {
                Some(path) => Arc::new(MemoryAlertRepository::from_seed_file(path).await?),
                None => Arc::new(MemoryAlertRepository::new()),
            },
        };

        // =========================================================================
        // 4. Dispatcher
        // =========================================================================
        let factory = match self.dispatcher_factory_override {
            Some(factory) => factory,
            None => {
                let channels = match self.channels_override {
                    Some(channels) => channels,
                    None => build_channels(&config)?,
                };
                let router = ChannelRouter::new(channels);
                if router.is_empty() {
                    warn!("No delivery channels configured; every alert will fail");
                }
                debug!(?router, "Channels registered");
                Arc::new(AlertSenderFactory::new(Arc::new(router), metrics.clone()))
                    as Arc<dyn DispatcherFactory>
            }
        };

        // =========================================================================
        // 5. Dispatch Loop
        // =========================================================================
        let dispatch_loop = DispatchLoop::new(
            repository,
            lock.clone(),
            factory,
            config.dispatch.clone(),
            metrics,
        );
        task_manager.spawn(
            "DispatchLoop",
            dispatch_loop.run(task_manager.get_shutdown_rx()),
        );

        info!("alertd initialized successfully. Polling for pending alerts...");

        Ok(App {
            task_manager,
            lock,
            metrics_addr,
        })
    }
}

fn build_channels(config: &Config) -> Result<Vec<Arc<dyn AlertChannel>>> {
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
    if config.channels.log_enabled {
        channels.push(Arc::new(LoggingChannel::new()));
    }
    if let Some(webhook) = &config.channels.webhook {
        let channel = WebhookChannel::new(webhook, Box::new(PlainTextFormatter))
            .with_context(|| format!("failed to build webhook channel {:?}", webhook.name))?;
        channels.push(Arc::new(channel));
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookConfig;

    #[test]
    fn test_build_channels_from_config() {
        let mut config = Config::default();
        config.channels.webhook = Some(WebhookConfig {
            name: "ops".to_string(),
            url: "http://127.0.0.1:1/hook".to_string(),
            timeout_seconds: 1,
        });

        let names: Vec<String> = build_channels(&config)
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        assert_eq!(names, vec!["log", "ops"]);
    }

    #[test]
    fn test_log_channel_can_be_disabled() {
        let mut config = Config::default();
        config.channels.log_enabled = false;
        assert!(build_channels(&config).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_lock_root_fails_startup() {
        let mut config = Config::default();
        config.lock.root_path = "/".to_string();
        let (_tx, rx) = watch::channel(false);

        let result = App::builder(config)
            .metrics_override(Metrics::new_for_test())
            .build(rx)
            .await;

        assert!(result.is_err());
    }
}
