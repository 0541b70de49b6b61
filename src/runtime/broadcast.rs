/// Outbound channel for `broadcast` action nodes

use crate::errors::ActionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    pub channel: String,
    pub message: Value,
    pub sent_at: DateTime<Utc>,
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, channel: &str, message: Value) -> Result<(), ActionError>;
}

/// In-process broadcaster; subscribers see every channel
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish(&self, channel: &str, message: Value) -> Result<(), ActionError> {
        if channel.trim().is_empty() {
            return Err(ActionError::Broadcast("channel must not be empty".to_string()));
        }
        let message = BroadcastMessage {
            channel: channel.to_string(),
            message,
            sent_at: Utc::now(),
        };
        match self.sender.send(message) {
            Ok(receivers) => tracing::debug!("📣 Broadcast on '{}' to {} subscribers", channel, receivers),
            Err(_) => tracing::debug!("📣 Broadcast on '{}' had no subscribers", channel),
        }
        Ok(())
    }
}
