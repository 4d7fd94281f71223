//! Core domain types and service traits for alertd
//!
//! This module defines the alert record shared by the repository, the
//! dispatchers and the delivery channels, and the trait contracts those
//! components implement.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery state of an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Pending delivery.
    #[default]
    Waiting,
    /// Delivered successfully.
    Success,
    /// Delivery was attempted and failed.
    Failed,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertStatus::Waiting => "waiting",
            AlertStatus::Success => "success",
            AlertStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A pending or processed notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub title: String,
    pub content: String,
    /// Name of the channel that delivers this alert (e.g. "log", "webhook").
    pub channel: String,
    #[serde(default)]
    pub status: AlertStatus,
    /// Outcome of the last delivery attempt.
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Creates a new waiting alert.
    pub fn new(id: i64, title: &str, content: &str, channel: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            content: content.to_string(),
            channel: channel.to_string(),
            status: AlertStatus::Waiting,
            log: None,
            created_at: Utc::now(),
        }
    }

    /// The lock path that claims this alert across processes.
    pub fn lock_path(&self) -> String {
        format!("/alert-{}", self.id)
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Stores the alert backlog.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Lists every alert still waiting for delivery, oldest first. "No
    /// pending alerts" is an empty vector.
    async fn list_pending(&self) -> Result<Vec<Alert>>;

    /// Returns the current status of an alert, or `None` if it is unknown.
    async fn fetch_status(&self, id: i64) -> Result<Option<AlertStatus>>;

    /// Records the outcome of a delivery attempt.
    async fn update_status(&self, id: i64, status: AlertStatus, log: &str) -> Result<()>;
}

/// Delivers alerts to one destination.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// The name alerts use to address this channel.
    fn name(&self) -> &str;

    /// Delivers one alert.
    ///
    /// # Returns
    /// * `Ok(())` if the destination accepted the alert
    /// * `Err` if delivery failed (network error, rejected payload, ...)
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}
