//! Tracks the long-running tasks of an `App` and awaits them at shutdown.
use futures::future::join_all;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Owns the `JoinHandle`s of named tasks and the shutdown flag they observe.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task_name = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    /// Returns a clone of the shutdown receiver.
    pub fn get_shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Number of tasks spawned and not yet awaited.
    pub fn task_count(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for all managed tasks to complete. Tasks are expected to exit on
    /// their own once the shutdown flag is set; nothing is aborted.
    pub async fn shutdown(self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        info!(tasks = handles.len(), "Waiting for tasks to complete");

        let (names, handles): (Vec<&'static str>, Vec<JoinHandle<()>>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut panicked = Vec::new();
        for (task_name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task_name, "Task finished"),
                Err(e) => {
                    error!(task_name, error = %e, "Task panicked");
                    panicked.push(task_name);
                }
            }
        }

        if panicked.is_empty() {
            info!("All tasks shut down gracefully.");
        } else {
            error!(tasks = ?panicked, "Some tasks panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_awaits_spawned_tasks() {
        let (tx, rx) = watch::channel(false);
        let manager = TaskManager::new(rx);
        let finished = Arc::new(AtomicBool::new(false));

        let mut task_rx = manager.get_shutdown_rx();
        let task_finished = finished.clone();
        manager.spawn("waiter", async move {
            let _ = task_rx.wait_for(|stop| *stop).await;
            task_finished.store(true, Ordering::SeqCst);
        });
        assert_eq!(manager.task_count(), 1);

        tx.send(true).unwrap();
        manager.shutdown().await;

        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_survives_panicking_task() {
        let (_tx, rx) = watch::channel(false);
        let manager = TaskManager::new(rx);
        manager.spawn("boom", async { panic!("task failure") });

        manager.shutdown().await;
    }
}
