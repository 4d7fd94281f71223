//! In-process coordination ensemble.
//!
//! `MemoryEnsemble` keeps a hierarchical namespace of persistent and
//! ephemeral nodes. Each `MemorySession` is one client session on it:
//! ephemeral nodes belong to the session that created them and disappear,
//! firing deletion subscriptions, when that session is closed, expired or
//! dropped.

use super::{
    parent_of, CoordinationClient, CoordinationError, DeletionListener, SessionId, WatchId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug)]
struct Node {
    /// `None` for persistent nodes.
    owner: Option<SessionId>,
}

struct Watch {
    id: WatchId,
    session: SessionId,
    listener: DeletionListener,
}

#[derive(Default)]
struct EnsembleState {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<Watch>>,
    live_sessions: HashSet<SessionId>,
    next_session: u64,
    next_watch: u64,
}

impl EnsembleState {
    fn has_node(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    /// Removes a node and returns the listeners subscribed to its deletion.
    fn remove_node(&mut self, path: &str) -> Vec<DeletionListener> {
        if self.nodes.remove(path).is_none() {
            return Vec::new();
        }
        self.watches
            .get(path)
            .map(|watches| watches.iter().map(|w| w.listener.clone()).collect())
            .unwrap_or_default()
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn validate(path: &str) -> Result<(), CoordinationError> {
    let well_formed = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if well_formed {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}

fn fire(path: &str, listeners: Vec<DeletionListener>) {
    for listener in listeners {
        listener(path);
    }
}

/// An in-process coordination ensemble shared by any number of sessions.
#[derive(Default)]
pub struct MemoryEnsemble {
    state: Mutex<EnsembleState>,
}

impl MemoryEnsemble {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens a new session on the ensemble.
    pub fn connect(self: &Arc<Self>) -> MemorySession {
        let id = {
            let mut state = self.state();
            state.next_session += 1;
            let id = SessionId(state.next_session);
            state.live_sessions.insert(id);
            id
        };
        debug!(session = id.0, "Coordination session opened");
        MemorySession {
            ensemble: Arc::clone(self),
            id,
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            operations: AtomicU64::new(0),
        }
    }

    /// Ends a session as if its lease timed out: its ephemeral nodes are
    /// removed and its subscriptions are dropped.
    pub fn expire_session(&self, session: SessionId) {
        let fired = {
            let mut state = self.state();
            if !state.live_sessions.remove(&session) {
                return;
            }
            for watches in state.watches.values_mut() {
                watches.retain(|w| w.session != session);
            }
            state.watches.retain(|_, watches| !watches.is_empty());

            let owned: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            owned
                .into_iter()
                .map(|path| {
                    let listeners = state.remove_node(&path);
                    (path, listeners)
                })
                .collect::<Vec<_>>()
        };
        info!(
            session = session.0,
            removed_nodes = fired.len(),
            "Coordination session ended"
        );
        for (path, listeners) in fired {
            fire(&path, listeners);
        }
    }

    /// Returns `true` if a node exists at `path`, bypassing any session.
    pub fn node_exists(&self, path: &str) -> bool {
        self.state().has_node(path)
    }

    /// Returns `true` while the session has not been closed or expired.
    pub fn is_live(&self, session: SessionId) -> bool {
        self.state().live_sessions.contains(&session)
    }

    /// Number of deletion subscriptions currently registered on `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.state().watches.get(path).map_or(0, Vec::len)
    }

    fn state(&self) -> MutexGuard<'_, EnsembleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create(&self, path: &str, owner: Option<SessionId>) -> Result<(), CoordinationError> {
        validate(path)?;
        let mut state = self.state();
        if state.has_node(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        let parent = parent_of(path);
        if !state.has_node(parent) {
            return Err(CoordinationError::NoNode(parent.to_string()));
        }
        if state.nodes.get(parent).is_some_and(|node| node.owner.is_some()) {
            return Err(CoordinationError::NoChildrenForEphemerals(parent.to_string()));
        }
        state.nodes.insert(path.to_string(), Node { owner });
        Ok(())
    }
}

/// One client session on a [`MemoryEnsemble`].
pub struct MemorySession {
    ensemble: Arc<MemoryEnsemble>,
    id: SessionId,
    available: AtomicBool,
    closed: AtomicBool,
    operations: AtomicU64,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ensemble(&self) -> &Arc<MemoryEnsemble> {
        &self.ensemble
    }

    /// Simulates a network partition: while unavailable every call fails
    /// with `ConnectionLoss`, but the session itself stays alive.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total number of calls issued through this session.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    fn begin(&self, op: &str, path: &str) -> Result<(), CoordinationError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoordinationError::Closed);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(CoordinationError::ConnectionLoss(format!("{op} {path}")));
        }
        if !self.ensemble.is_live(self.id) {
            return Err(CoordinationError::SessionExpired);
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for MemorySession {
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        self.begin("exists", path)?;
        validate(path)?;
        Ok(self.ensemble.node_exists(path))
    }

    async fn create_ephemeral(&self, path: &str) -> Result<(), CoordinationError> {
        self.begin("create_ephemeral", path)?;
        self.ensemble.create(path, Some(self.id))
    }

    async fn create_persistent(&self, path: &str) -> Result<(), CoordinationError> {
        self.begin("create_persistent", path)?;
        self.ensemble.create(path, None)
    }

    async fn delete(&self, path: &str) -> Result<bool, CoordinationError> {
        self.begin("delete", path)?;
        validate(path)?;
        if path == "/" {
            return Err(CoordinationError::InvalidPath(path.to_string()));
        }
        let listeners = {
            let mut state = self.ensemble.state();
            if !state.nodes.contains_key(path) {
                return Ok(false);
            }
            if state.has_children(path) {
                return Err(CoordinationError::NotEmpty(path.to_string()));
            }
            state.remove_node(path)
        };
        fire(path, listeners);
        Ok(true)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.begin("list_children", path)?;
        validate(path)?;
        let state = self.ensemble.state();
        if !state.has_node(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        let prefix = child_prefix(path);
        let children = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect();
        Ok(children)
    }

    async fn subscribe_deletion(
        &self,
        path: &str,
        listener: DeletionListener,
    ) -> Result<WatchId, CoordinationError> {
        self.begin("subscribe_deletion", path)?;
        validate(path)?;
        let mut state = self.ensemble.state();
        state.next_watch += 1;
        let id = WatchId(state.next_watch);
        state.watches.entry(path.to_string()).or_default().push(Watch {
            id,
            session: self.id,
            listener,
        });
        Ok(id)
    }

    async fn unsubscribe(&self, path: &str, watch: WatchId) -> Result<(), CoordinationError> {
        self.begin("unsubscribe", path)?;
        let mut state = self.ensemble.state();
        if let Some(watches) = state.watches.get_mut(path) {
            watches.retain(|w| w.id != watch);
            if watches.is_empty() {
                state.watches.remove(path);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CoordinationError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ensemble.expire_session(self.id);
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        // A session that goes away without `close` still ends on the ensemble.
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.ensemble.expire_session(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_create_ephemeral_is_create_if_absent() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        session.create_persistent("/root").await.unwrap();
        session.create_ephemeral("/root/a").await.unwrap();
        let err = session.create_ephemeral("/root/a").await.unwrap_err();

        assert_eq!(err, CoordinationError::NodeExists("/root/a".to_string()));
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        let err = session.create_ephemeral("/missing/a").await.unwrap_err();

        assert_eq!(err, CoordinationError::NoNode("/missing".to_string()));
    }

    #[tokio::test]
    async fn test_list_children_returns_direct_names_only() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session.create_persistent("/root").await.unwrap();
        session.create_persistent("/root/b").await.unwrap();
        session.create_ephemeral("/root/a").await.unwrap();
        session.create_ephemeral("/root/b/nested").await.unwrap();
        session.create_persistent("/rootx").await.unwrap();

        let children = session.list_children("/root").await.unwrap();

        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_with_children_fails() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session.create_persistent("/root").await.unwrap();
        session.create_ephemeral("/root/a").await.unwrap();

        let err = session.delete("/root").await.unwrap_err();

        assert_eq!(err, CoordinationError::NotEmpty("/root".to_string()));
        assert!(!session.delete("/root/zzz").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_fires_deletion_listeners_until_unsubscribed() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session.create_persistent("/root").await.unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let watch = session
            .subscribe_deletion(
                "/root/a",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        session.create_ephemeral("/root/a").await.unwrap();
        assert!(session.delete("/root/a").await.unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        session.unsubscribe("/root/a", watch).await.unwrap();
        session.create_ephemeral("/root/a").await.unwrap();
        assert!(session.delete("/root/a").await.unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(ensemble.watch_count("/root/a"), 0);
    }

    #[tokio::test]
    async fn test_session_end_removes_ephemeral_nodes_only() {
        let ensemble = MemoryEnsemble::new();
        let owner = ensemble.connect();
        let observer = ensemble.connect();
        owner.create_persistent("/root").await.unwrap();
        owner.create_ephemeral("/root/lock").await.unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        observer
            .subscribe_deletion(
                "/root/lock",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        drop(owner);

        assert!(ensemble.node_exists("/root"));
        assert!(!ensemble.node_exists("/root/lock"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_session_fails_with_connection_loss() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session.set_available(false);

        let err = session.exists("/root").await.unwrap_err();

        assert!(matches!(err, CoordinationError::ConnectionLoss(_)));
        assert_eq!(session.operation_count(), 1);
        assert!(ensemble.is_live(session.id()));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(
            session.exists("/").await.unwrap_err(),
            CoordinationError::Closed
        );
        assert!(!ensemble.is_live(session.id()));
    }

    #[tokio::test]
    async fn test_expired_session_reports_expiry() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();
        ensemble.expire_session(session.id());

        assert_eq!(
            session.exists("/").await.unwrap_err(),
            CoordinationError::SessionExpired
        );
    }

    #[tokio::test]
    async fn test_malformed_paths_are_rejected() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect();

        for path in ["", "a", "/a/", "//a"] {
            assert!(matches!(
                session.create_persistent(path).await,
                Err(CoordinationError::InvalidPath(_))
            ));
        }
    }
}
