//! Contract for the external coordination service client.
//!
//! The lock only ever talks to the coordination service through the
//! [`CoordinationClient`] trait. A client is bound to one session: ephemeral
//! nodes it creates live exactly as long as that session does, and the
//! service removes them on its own when the session ends.
//!
//! [`memory`] provides an in-process ensemble implementing the same
//! semantics, used for standalone runs and tests.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{MemoryEnsemble, MemorySession};

/// Callback invoked with the full node path when a watched node is deleted.
pub type DeletionListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Identifies one deletion subscription so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Identifies a client session on the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("ephemeral nodes cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("malformed node path: {0:?}")]
    InvalidPath(String),

    #[error("connection to the coordination service was lost: {0}")]
    ConnectionLoss(String),

    #[error("coordination session has expired")]
    SessionExpired,

    #[error("coordination client is closed")]
    Closed,
}

impl CoordinationError {
    /// `true` for failures that may clear up on their own, so the call is
    /// worth repeating on the same session.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::ConnectionLoss(_))
    }
}

/// A session-oriented client to a hierarchical, watch-capable coordination
/// service.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Returns `true` if a node exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Atomically creates an ephemeral node at `path`.
    ///
    /// # Returns
    /// * `Err(NodeExists)` if the node is already present
    /// * `Err(NoNode)` if the parent node is absent
    async fn create_ephemeral(&self, path: &str) -> Result<(), CoordinationError>;

    /// Creates a persistent node at `path`. Same failure modes as
    /// [`create_ephemeral`](Self::create_ephemeral).
    async fn create_persistent(&self, path: &str) -> Result<(), CoordinationError>;

    /// Deletes the node at `path`, returning `true` if it was removed.
    async fn delete(&self, path: &str) -> Result<bool, CoordinationError>;

    /// Lists the names (not full paths) of the direct children of `path`.
    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    /// Registers `listener` to be called when the node at `path` is deleted.
    ///
    /// The path does not need to exist at subscription time. The
    /// subscription stays active until [`unsubscribe`](Self::unsubscribe)
    /// is called or the session ends; when the session ends the listener is
    /// dropped without being invoked.
    async fn subscribe_deletion(
        &self,
        path: &str,
        listener: DeletionListener,
    ) -> Result<WatchId, CoordinationError>;

    /// Removes a subscription created by
    /// [`subscribe_deletion`](Self::subscribe_deletion).
    async fn unsubscribe(&self, path: &str, watch: WatchId) -> Result<(), CoordinationError>;

    /// Ends the session and releases the client's resources.
    async fn close(&self) -> Result<(), CoordinationError>;
}

/// Returns the parent of a normalized absolute path (`/a/b` -> `/a`, `/a` -> `/`).
pub(crate) fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}
