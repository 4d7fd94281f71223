//! Delivery channels for alerts.
//!
//! Each channel implements [`AlertChannel`](crate::core::AlertChannel) and is
//! registered by name in a [`ChannelRouter`]. Dispatchers hand every alert to
//! the router, which picks the channel named by the alert.
pub mod logging;
pub mod webhook;

use crate::core::{Alert, AlertChannel};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use logging::LoggingChannel;
pub use webhook::WebhookChannel;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("no channel named {0:?} is configured")]
    UnknownChannel(String),

    #[error("channel {channel:?} failed to deliver alert: {source}")]
    Delivery {
        channel: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Routes alerts to channels by name.
#[derive(Default, Clone)]
pub struct ChannelRouter {
    channels: HashMap<String, Arc<dyn AlertChannel>>,
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.channels.keys().collect();
        names.sort();
        f.debug_struct("ChannelRouter").field("channels", &names).finish()
    }
}

impl ChannelRouter {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        let mut router = Self::default();
        for channel in channels {
            router.register(channel);
        }
        router
    }

    /// Adds a channel, replacing any channel registered under the same name.
    pub fn register(&mut self, channel: Arc<dyn AlertChannel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Delivers `alert` through the channel it names.
    pub async fn deliver(&self, alert: &Alert) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get(&alert.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(alert.channel.clone()))?;
        debug!(alert_id = alert.id, channel = channel.name(), "Delivering alert");
        channel
            .deliver(alert)
            .await
            .map_err(|source| ChannelError::Delivery {
                channel: channel.name().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingChannel {
        name: &'static str,
        fail: bool,
        delivered: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl AlertChannel for RecordingChannel {
        fn name(&self) -> &str {
            self.name
        }

        async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("destination rejected alert");
            }
            self.delivered.lock().unwrap().push(alert.id);
            Ok(())
        }
    }

    fn channel(name: &'static str, fail: bool) -> Arc<RecordingChannel> {
        Arc::new(RecordingChannel {
            name,
            fail,
            delivered: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_router_delivers_to_named_channel() {
        let log = channel("log", false);
        let other = channel("other", false);
        let router = ChannelRouter::new(vec![
            log.clone() as Arc<dyn AlertChannel>,
            other.clone() as Arc<dyn AlertChannel>,
        ]);

        router.deliver(&Alert::new(1, "t", "c", "log")).await.unwrap();

        assert_eq!(*log.delivered.lock().unwrap(), vec![1]);
        assert!(other.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_router_rejects_unknown_channel() {
        let router = ChannelRouter::new(vec![channel("log", false) as Arc<dyn AlertChannel>]);

        let err = router
            .deliver(&Alert::new(1, "t", "c", "sms"))
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::UnknownChannel(name) if name == "sms"));
    }

    #[tokio::test]
    async fn test_router_wraps_delivery_failures() {
        let router = ChannelRouter::new(vec![channel("log", true) as Arc<dyn AlertChannel>]);

        let err = router
            .deliver(&Alert::new(1, "t", "c", "log"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("destination rejected alert"));
    }
}
