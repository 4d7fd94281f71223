//! Lock backend bound to a coordination service client.

use super::{AcquirePolicy, DistributedLock, LockError, LockPath};
use crate::config::LockConfig;
use crate::coordination::{CoordinationClient, CoordinationError, DeletionListener};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

/// A [`DistributedLock`] whose lock nodes are ephemeral nodes under a fixed
/// root on the coordination service.
///
/// Every operation addresses `root + normalized path`; the same full path is
/// used to create, check, watch and delete a lock node.
pub struct CoordinatedLock {
    client: Arc<dyn CoordinationClient>,
    root: String,
    policy: AcquirePolicy,
}

impl std::fmt::Debug for CoordinatedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatedLock")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CoordinatedLock {
    /// Binds a lock to `client`, creating the persistent root node if it is
    /// missing.
    pub async fn connect(
        client: Arc<dyn CoordinationClient>,
        config: &LockConfig,
    ) -> Result<Self, LockError> {
        let root = LockPath::parse(&config.root_path)
            .ok_or_else(|| LockError::InvalidPath(config.root_path.clone()))?;

        if !client.exists(root.as_str()).await? {
            match client.create_persistent(root.as_str()).await {
                Ok(()) => info!(root = %root, "Created lock root"),
                // Another process created it between the check and the create.
                Err(CoordinationError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self {
            client,
            root: root.to_string(),
            policy: config.acquire_policy(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Full coordination-service path of the lock node for `path`.
    pub fn node_path(&self, path: &LockPath) -> String {
        format!("{}{}", self.root, path)
    }
}

#[async_trait]
impl DistributedLock for CoordinatedLock {
    async fn attempt(&self, path: &LockPath) -> Result<bool, LockError> {
        let node = self.node_path(path);
        match self.client.create_ephemeral(&node).await {
            Ok(()) => {
                metrics::counter!("lock_acquire_total", "outcome" => "acquired").increment(1);
                info!(node = %node, "Locked path");
                Ok(true)
            }
            Err(CoordinationError::NodeExists(_)) => {
                metrics::counter!("lock_acquire_total", "outcome" => "contended").increment(1);
                debug!(node = %node, "Lock is already held");
                Ok(false)
            }
            Err(e) => {
                metrics::counter!("lock_acquire_total", "outcome" => "error").increment(1);
                error!(node = %node, error = %e, "Failed to create lock node");
                Err(e.into())
            }
        }
    }

    #[instrument(skip_all, fields(path = %path))]
    async fn wait_for_release(
        &self,
        path: &LockPath,
        deadline: Option<Instant>,
    ) -> Result<(), LockError> {
        let node = self.node_path(path);

        // Fresh per call: concurrent waiters never share a wake-up signal.
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let listener: DeletionListener = Arc::new(move |_deleted: &str| {
            if let Some(tx) = tx.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(());
            }
        });

        let watch = self.client.subscribe_deletion(&node, listener).await?;

        // Subscribe first, then check: a release between the two still wakes us.
        let outcome = match self.client.exists(&node).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                debug!(node = %node, "Waiting for lock release");
                let received = match deadline {
                    Some(deadline) => timeout_at(deadline, rx)
                        .await
                        .map_err(|_| LockError::Timeout(path.to_string())),
                    None => Ok(rx.await),
                };
                received.and_then(|r| r.map_err(|_| LockError::WaitAborted(path.to_string())))
            }
            Err(e) => Err(e.into()),
        };

        // Every exit after a successful subscribe, including timeout, ends here.
        if let Err(e) = self.client.unsubscribe(&node, watch).await {
            warn!(node = %node, error = %e, "Failed to remove deletion subscription");
        }
        outcome
    }

    async fn release_lock(&self, path: &str) -> bool {
        let Some(lock_path) = LockPath::parse(path) else {
            return false;
        };
        let node = self.node_path(&lock_path);

        match self.client.exists(&node).await {
            Ok(false) => return true,
            Ok(true) => {}
            Err(e) => {
                error!(node = %node, error = %e, "Failed to check lock node before release");
                return false;
            }
        }

        match self.client.delete(&node).await {
            Ok(deleted) => {
                metrics::counter!("lock_release_total").increment(1);
                info!(node = %node, deleted, "Unlocked path");
                deleted
            }
            // Released by someone else between the check and the delete.
            Err(CoordinationError::NoNode(_)) => true,
            Err(e) => {
                error!(node = %node, error = %e, "Failed to delete lock node");
                false
            }
        }
    }

    async fn list_held(&self) -> Result<Vec<String>, LockError> {
        Ok(self.client.list_children(&self.root).await?)
    }

    async fn close(&self) -> Result<(), LockError> {
        info!(root = %self.root, "Closing coordination client");
        Ok(self.client.close().await?)
    }

    fn acquire_policy(&self) -> AcquirePolicy {
        self.policy
    }
}
