//! In-process broadcaster used when AMQP is disabled
//!
//! Each room gets its own `tokio::sync::broadcast` channel, created on first
//! subscription. Events published to a room without subscribers are dropped.

use crate::amqp::messages::RoomEvent;
use crate::amqp::publisher::EventBroadcaster;
use crate::error::{BridgeError, Result};
use crate::types::RoomId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

pub struct LocalBroadcaster {
    channels: RwLock<HashMap<RoomId, broadcast::Sender<RoomEvent>>>,
    capacity: usize,
}

impl LocalBroadcaster {
    /// Create a broadcaster buffering up to `capacity` events per room
    pub fn new(capacity: usize) -> Self {
        info!("Local broadcaster initialized with capacity {}", capacity);
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to every event published to a room
    pub fn subscribe(&self, room_id: &str) -> Result<BroadcastStream<RoomEvent>> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| BridgeError::internal("Failed to acquire channels write lock"))?;

        let sender = channels
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        Ok(BroadcastStream::new(sender.subscribe()))
    }

    /// Current number of subscribers of a room
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(room_id).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Drop channels nobody listens to any more
    pub fn prune(&self) -> usize {
        let Ok(mut channels) = self.channels.write() else {
            return 0;
        };
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl EventBroadcaster for LocalBroadcaster {
    async fn publish(
        &self,
        room_id: &str,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let channels = self
            .channels
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire channels read lock"))?;

        if let Some(tx) = channels.get(room_id) {
            let event = RoomEvent {
                room_id: room_id.to_string(),
                event: event_name.to_string(),
                payload,
            };
            if let Ok(count) = tx.send(event) {
                debug!("Broadcast {} to {} subscribers of {}", event_name, count, room_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscribers_receive_room_events_in_order() {
        let broadcaster = LocalBroadcaster::new(16);
        let mut room_1 = broadcaster.subscribe("room-1").unwrap();
        let mut room_2 = broadcaster.subscribe("room-2").unwrap();

        broadcaster
            .publish("room-1", "first", serde_json::json!(1))
            .await
            .unwrap();
        broadcaster
            .publish("room-2", "other", serde_json::json!(2))
            .await
            .unwrap();
        broadcaster
            .publish("room-1", "second", serde_json::json!(3))
            .await
            .unwrap();

        let first = room_1.next().await.unwrap().unwrap();
        let second = room_1.next().await.unwrap().unwrap();
        assert_eq!(first.event, "first");
        assert_eq!(second.event, "second");

        let other = room_2.next().await.unwrap().unwrap();
        assert_eq!(other.payload, serde_json::json!(2));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broadcaster = LocalBroadcaster::default();
        assert!(broadcaster
            .publish("empty", "nobody-home", serde_json::Value::Null)
            .await
            .is_ok());
        assert_eq!(broadcaster.subscriber_count("empty"), 0);
    }

    #[tokio::test]
    async fn test_prune_drops_abandoned_channels() {
        let broadcaster = LocalBroadcaster::default();
        let stream = broadcaster.subscribe("room-1").unwrap();
        assert_eq!(broadcaster.subscriber_count("room-1"), 1);

        drop(stream);
        assert_eq!(broadcaster.prune(), 1);
        assert_eq!(broadcaster.subscriber_count("room-1"), 0);
    }
}
