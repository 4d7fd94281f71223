//! Exclusive advisory locks over named paths.
//!
//! A lock is identified only by its normalized path: whoever creates the
//! node holds the lock, anyone may release it. The [`DistributedLock`]
//! trait exposes the primitive operations; the waiting and non-waiting
//! acquisition helpers are default methods composed from them.
//!
//! Blocking acquisition is unbounded unless a wait timeout is configured or
//! [`DistributedLock::acquire_with_timeout`] is used. A lock whose holder
//! never releases it (for example a stuck process whose session is still
//! alive) blocks an unbounded waiter forever.

pub mod coordinated;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::coordination::CoordinationError;

pub use coordinated::CoordinatedLock;

/// A normalized lock path: non-empty, exactly one leading `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockPath(String);

impl LockPath {
    /// Normalizes `raw`, returning `None` for values that can never name a
    /// lock (empty, or nothing but separators).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim_start_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(format!("/{trimmed}")))
    }

    /// Like [`parse`](Self::parse), treating an absent value as invalid.
    pub fn from_optional(raw: Option<&str>) -> Option<Self> {
        raw.and_then(Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("invalid lock path: {0:?}")]
    InvalidPath(String),

    #[error("coordination service error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("timed out waiting for lock {0}")]
    Timeout(String),

    #[error("wait for release of {0} ended without a deletion event")]
    WaitAborted(String),
}

/// Retry and wait settings for blocking acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquirePolicy {
    /// First delay after a coordination error; doubles on each consecutive error.
    pub initial_backoff: Duration,
    /// Upper bound for the error backoff.
    pub max_backoff: Duration,
    /// Default bound for `acquire_with_waiting`; `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            wait_timeout: None,
        }
    }
}

/// Capability interface for a distributed exclusive lock.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// One atomic acquisition attempt on an already-normalized path.
    ///
    /// # Returns
    /// * `Ok(true)` if this call created the lock node
    /// * `Ok(false)` if the lock is already held
    /// * `Err` if the coordination service could not answer
    async fn attempt(&self, path: &LockPath) -> Result<bool, LockError>;

    /// Suspends until the lock node at `path` is deleted, or returns
    /// immediately if it is already absent.
    ///
    /// # Returns
    /// * `Err(Timeout)` if `deadline` passes first
    /// * `Err(WaitAborted)` if the subscription ends without an event
    async fn wait_for_release(
        &self,
        path: &LockPath,
        deadline: Option<Instant>,
    ) -> Result<(), LockError>;

    /// Releases the lock at `path`. Returns `false` for an invalid path or a
    /// failed deletion, and `true` if the lock is now free, including when
    /// it was not held at all.
    async fn release_lock(&self, path: &str) -> bool;

    /// Names of the lock nodes currently present under the lock root.
    async fn list_held(&self) -> Result<Vec<String>, LockError>;

    /// Releases the underlying client. Held lock nodes are not deleted
    /// explicitly; they go away with the client session.
    async fn close(&self) -> Result<(), LockError>;

    /// Backoff and wait settings used by the blocking helpers.
    fn acquire_policy(&self) -> AcquirePolicy {
        AcquirePolicy::default()
    }

    /// Single non-blocking attempt. Invalid paths and coordination errors
    /// both yield `false`; the two are told apart only through logs and the
    /// `lock_acquire_total` metric.
    async fn try_acquire(&self, path: &str) -> bool {
        let Some(lock_path) = LockPath::parse(path) else {
            debug!(path, "Rejecting empty lock path");
            return false;
        };
        match self.attempt(&lock_path).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(path = %lock_path, error = %e, "Lock attempt failed");
                false
            }
        }
    }

    /// Same as [`try_acquire`](Self::try_acquire).
    async fn acquire_without_waiting(&self, path: &str) -> bool {
        self.try_acquire(path).await
    }

    /// Acquires the lock, waiting for the current holder to release it as
    /// often as needed. Bounded only by the policy's `wait_timeout`.
    ///
    /// # Returns
    /// * `Ok(false)` for an invalid path
    /// * `Ok(true)` once the lock is held
    async fn acquire_with_waiting(&self, path: &str) -> Result<bool, LockError> {
        let deadline = self.acquire_policy().wait_timeout.map(|t| Instant::now() + t);
        self.acquire_until(path, deadline).await
    }

    /// Like [`acquire_with_waiting`](Self::acquire_with_waiting) but gives up
    /// with `LockError::Timeout` after `timeout`.
    async fn acquire_with_timeout(&self, path: &str, timeout: Duration) -> Result<bool, LockError> {
        self.acquire_until(path, Some(Instant::now() + timeout)).await
    }

    /// The blocking acquisition loop shared by the waiting helpers.
    ///
    /// Transient coordination errors (`ConnectionLoss`) are retried after
    /// an exponential backoff. Errors that cannot clear up on the same
    /// session end the wait early and are returned to the caller:
    /// `SessionExpired`, `Closed`, `NoNode` (missing parent), `InvalidPath`,
    /// as well as `WaitAborted` and `Timeout`.
    async fn acquire_until(&self, path: &str, deadline: Option<Instant>) -> Result<bool, LockError> {
        let Some(lock_path) = LockPath::parse(path) else {
            debug!(path, "Rejecting empty lock path");
            return Ok(false);
        };
        let policy = self.acquire_policy();
        let mut backoff = policy.initial_backoff;

        loop {
            let outcome = match self.attempt(&lock_path).await {
                Ok(true) => {
                    info!(path = %lock_path, "Acquired lock");
                    return Ok(true);
                }
                Ok(false) => self.wait_for_release(&lock_path, deadline).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => backoff = policy.initial_backoff,
                Err(LockError::Coordination(e)) if e.is_transient() => {
                    if deadline.is_some_and(|d| Instant::now() + backoff >= d) {
                        return Err(LockError::Timeout(lock_path.to_string()));
                    }
                    warn!(
                        path = %lock_path,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Coordination error while acquiring lock, retrying after backoff"
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(policy.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_normalization() {
        assert_eq!(LockPath::parse("x").unwrap().as_str(), "/x");
        assert_eq!(LockPath::parse("/x").unwrap().as_str(), "/x");
        assert_eq!(LockPath::parse("//x").unwrap().as_str(), "/x");
        assert_eq!(LockPath::parse("x"), LockPath::parse("/x"));
        assert_eq!(LockPath::parse("alert-7").unwrap().to_string(), "/alert-7");
    }

    #[test]
    fn test_lock_path_rejects_empty_values() {
        assert!(LockPath::parse("").is_none());
        assert!(LockPath::parse("/").is_none());
        assert!(LockPath::parse("///").is_none());
        assert!(LockPath::from_optional(None).is_none());
        assert!(LockPath::from_optional(Some("")).is_none());
        assert!(LockPath::from_optional(Some("a")).is_some());
    }

    #[test]
    fn test_default_policy_waits_forever() {
        let policy = AcquirePolicy::default();
        assert_eq!(policy.wait_timeout, None);
        assert!(policy.initial_backoff <= policy.max_backoff);
    }
}
