//! Configuration management for alertd
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults, an `alertd.toml` file, `ALERTD_`-prefixed
//! environment variables and command-line overrides.

use crate::cli::Cli;
use crate::lock::AcquirePolicy;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The default configuration file, used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "alertd.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Distributed lock settings.
    pub lock: LockConfig,
    /// Polling loop settings.
    pub dispatch: DispatchConfig,
    /// Metrics exporter settings.
    pub metrics: MetricsConfig,
    /// Alert backlog settings.
    pub repository: RepositoryConfig,
    /// Delivery channel settings.
    pub channels: ChannelsConfig,
}

/// Configuration for the distributed lock.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    /// Persistent node under which all lock nodes are created.
    pub root_path: String,
    /// Initial backoff after a coordination error, in milliseconds.
    pub retry_initial_backoff_ms: u64,
    /// Maximum backoff after repeated coordination errors, in milliseconds.
    pub retry_max_backoff_ms: u64,
    /// Default bound for blocking acquisition. Unset means wait forever.
    pub wait_timeout_seconds: Option<u64>,
}

impl LockConfig {
    pub fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy {
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(
                self.retry_max_backoff_ms.max(self.retry_initial_backoff_ms),
            ),
            wait_timeout: self.wait_timeout_seconds.map(Duration::from_secs),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            root_path: "/distributedLockRoot".to_string(),
            retry_initial_backoff_ms: 100,
            retry_max_backoff_ms: 5000,
            wait_timeout_seconds: None,
        }
    }
}

/// Configuration for the dispatch loop.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound (inclusive) of the random pause before each poll, in seconds.
    pub max_jitter_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_jitter_seconds: 9,
        }
    }
}

/// Configuration for the Prometheus exporter.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve `/metrics` when enabled.
    pub enabled: bool,
    /// The address the metrics server binds to.
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9898)),
        }
    }
}

/// Configuration for the in-memory alert repository.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct RepositoryConfig {
    /// JSON file of alerts loaded into the backlog at startup.
    pub seed_file: Option<PathBuf>,
}

/// Configuration for delivery channels.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Register the `log` channel.
    pub log_enabled: bool,
    /// Optional webhook channel.
    pub webhook: Option<WebhookConfig>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            log_enabled: true,
            webhook: None,
        }
    }
}

/// Configuration for a webhook channel.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WebhookConfig {
    /// Channel name alerts refer to.
    #[serde(default = "default_webhook_name")]
    pub name: String,
    /// Endpoint receiving `{ "text": ... }` POSTs.
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
}

fn default_webhook_name() -> String {
    "webhook".to_string()
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Config {
    /// Loads the application configuration, layering defaults, the TOML
    /// file, environment variables and command-line arguments.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // e.g. ALERTD_LOCK__ROOT_PATH=/locks
            .merge(Env::prefixed("ALERTD_").split("__"))
            .merge(cli)
            .extract()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            lock: LockConfig::default(),
            dispatch: DispatchConfig::default(),
            metrics: MetricsConfig::default(),
            repository: RepositoryConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}
