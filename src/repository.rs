//! In-memory alert backlog.

use crate::core::{Alert, AlertRepository, AlertStatus};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// An [`AlertRepository`] that keeps alerts in insertion order in memory.
///
/// Several dispatch loops may share one instance (behind an `Arc`) to model
/// cooperating processes reading the same backlog.
#[derive(Debug, Default)]
pub struct MemoryAlertRepository {
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryAlertRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alerts(alerts: Vec<Alert>) -> Self {
        Self {
            alerts: RwLock::new(alerts),
        }
    }

    /// Loads alerts from a JSON array file.
    pub async fn from_seed_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read alert seed file {}", path.display()))?;
        let alerts: Vec<Alert> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse alert seed file {}", path.display()))?;
        info!(count = alerts.len(), path = %path.display(), "Loaded alert seed file");
        Ok(Self::with_alerts(alerts))
    }

    /// Appends an alert to the backlog.
    pub async fn insert(&self, alert: Alert) {
        self.alerts.write().await.push(alert);
    }

    /// Returns a copy of an alert by id.
    pub async fn get(&self, id: i64) -> Option<Alert> {
        self.alerts.read().await.iter().find(|a| a.id == id).cloned()
    }
}

#[async_trait]
impl AlertRepository for MemoryAlertRepository {
    async fn list_pending(&self) -> Result<Vec<Alert>> {
        let pending: Vec<Alert> = self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| a.status == AlertStatus::Waiting)
            .cloned()
            .collect();
        debug!(count = pending.len(), "Listed pending alerts");
        Ok(pending)
    }

    async fn fetch_status(&self, id: i64) -> Result<Option<AlertStatus>> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.status))
    }

    async fn update_status(&self, id: i64, status: AlertStatus, log: &str) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let Some(alert) = alerts.iter_mut().find(|a| a.id == id) else {
            bail!("alert {} does not exist", id);
        };
        alert.status = status;
        alert.log = Some(log.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_list_pending_skips_processed_alerts() {
        let repo = MemoryAlertRepository::with_alerts(vec![
            Alert::new(1, "a", "a", "log"),
            Alert::new(2, "b", "b", "log"),
        ]);
        repo.update_status(1, AlertStatus::Success, "sent").await.unwrap();

        let pending = repo.list_pending().await.unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 2);
        assert_eq!(repo.get(1).await.unwrap().log.as_deref(), Some("sent"));
    }

    #[tokio::test]
    async fn test_empty_repository_lists_nothing() {
        let repo = MemoryAlertRepository::new();
        assert!(repo.list_pending().await.unwrap().is_empty());
        assert_eq!(repo.fetch_status(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_unknown_alert_fails() {
        let repo = MemoryAlertRepository::new();
        assert!(repo
            .update_status(9, AlertStatus::Failed, "boom")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_seed_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 1, "title": "t", "content": "c", "channel": "log"}}]"#
        )
        .unwrap();

        let repo = MemoryAlertRepository::from_seed_file(file.path()).await.unwrap();

        assert_eq!(repo.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_seed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(MemoryAlertRepository::from_seed_file(file.path()).await.is_err());
    }
}
