#![allow(dead_code)]

use alertd::config::LockConfig;
use alertd::coordination::memory::{MemoryEnsemble, MemorySession};
use alertd::core::{Alert, AlertChannel};
use alertd::dispatch::{DispatchCycle, DispatchSummary, Dispatcher, DispatcherFactory};
use alertd::lock::CoordinatedLock;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A lock bound to its own session on `ensemble`, plus a handle to that
/// session for fault injection.
pub async fn lock_on(ensemble: &Arc<MemoryEnsemble>) -> (CoordinatedLock, Arc<MemorySession>) {
    lock_with_config(ensemble, &LockConfig::default()).await
}

pub async fn lock_with_config(
    ensemble: &Arc<MemoryEnsemble>,
    config: &LockConfig,
) -> (CoordinatedLock, Arc<MemorySession>) {
    let session = Arc::new(ensemble.connect());
    let lock = CoordinatedLock::connect(session.clone(), config)
        .await
        .expect("lock root bootstrap");
    (lock, session)
}

/// Lock config with short backoffs so retry tests stay fast.
pub fn fast_retry_config() -> LockConfig {
    LockConfig {
        retry_initial_backoff_ms: 10,
        retry_max_backoff_ms: 40,
        ..LockConfig::default()
    }
}

/// Records every batch handed to a dispatcher it builds.
#[derive(Default)]
pub struct CountingFactory {
    batches: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every batch seen so far, in dispatch order.
    pub fn batches(&self) -> Vec<Vec<i64>> {
        self.batches.lock().unwrap().clone()
    }
}

struct CountingDispatcher {
    batches: Arc<Mutex<Vec<Vec<i64>>>>,
    cycle: DispatchCycle,
}

#[async_trait]
impl Dispatcher for CountingDispatcher {
    async fn run(&mut self) -> anyhow::Result<DispatchSummary> {
        let ids: Vec<i64> = self.cycle.alerts.iter().map(|a| a.id).collect();
        let count = ids.len();
        self.batches.lock().unwrap().push(ids);
        Ok(DispatchSummary {
            skipped: count,
            ..Default::default()
        })
    }
}

impl DispatcherFactory for CountingFactory {
    fn create(&self, cycle: DispatchCycle) -> Box<dyn Dispatcher> {
        Box::new(CountingDispatcher {
            batches: self.batches.clone(),
            cycle,
        })
    }
}

/// A channel that remembers what it delivered and can be slowed down to
/// widen race windows between processes.
pub struct RecordingChannel {
    name: String,
    delay: Duration,
    delivered: Mutex<Vec<i64>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_delay(name, Duration::ZERO)
    }

    pub fn with_delay(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<i64> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.delivered.lock().unwrap().push(alert.id);
        Ok(())
    }
}

/// `count` waiting alerts addressed to `channel`, ids starting at 1.
pub fn alerts(count: i64, channel: &str) -> Vec<Alert> {
    (1..=count)
        .map(|id| Alert::new(id, &format!("alert {id}"), "body", channel))
        .collect()
}
