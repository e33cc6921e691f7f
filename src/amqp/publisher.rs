//! Event broadcasting for outbound room notifications

use crate::amqp::messages::{room_routing_key, MessageEnvelope, RoomEvent};
use crate::error::{BridgeError, Result};
use crate::metrics::MetricsCollector;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Delivers named events to every subscriber of a room.
///
/// Delivery is best effort, in publish order per room.
#[async_trait]
pub trait EventBroadcaster: Send + Sync {
    async fn publish(&self, room_id: &str, event_name: &str, payload: serde_json::Value)
        -> Result<()>;
}

/// Serialize and publish an event, logging instead of failing.
///
/// Returns whether the broadcaster accepted the event.
pub async fn publish_or_warn<T>(
    broadcaster: &dyn EventBroadcaster,
    room_id: &str,
    event_name: &str,
    event: &T,
) -> bool
where
    T: Serialize + Sync,
{
    let payload = match serde_json::to_value(event) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to serialize {} event for room {}: {}", event_name, room_id, e);
            return false;
        }
    };

    match broadcaster.publish(room_id, event_name, payload).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to publish {} to room {}: {}", event_name, room_id, e);
            false
        }
    }
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: crate::amqp::messages::ROOM_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-based broadcaster publishing to a topic exchange.
///
/// Each event is routed as `room.<roomId>.<eventName>`.
pub struct AmqpEventBroadcaster {
    channel: Channel,
    config: PublisherConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AmqpEventBroadcaster {
    /// Create a new broadcaster and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let broadcaster = Self {
            channel,
            config,
            metrics: None,
        };
        broadcaster.setup_exchange().await?;
        Ok(broadcaster)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| BridgeError::AmqpConnectionFailed {
                message: format!("Failed to declare room events exchange: {}", e),
            })?;

        info!("Declared room events exchange '{}'", self.config.exchange);
        Ok(())
    }

    /// Publish an envelope with retry and exponential backoff
    async fn publish_with_retry(&self, envelope: &MessageEnvelope<RoomEvent>) -> Result<()> {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            let timer = self.metrics.as_ref().map(|metrics| metrics.start_timer());
            let outcome = self.try_publish(envelope).await;
            if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
                metrics.record_amqp_operation("publish", outcome.is_ok(), timer.stop());
            }

            match outcome {
                Ok(_) => {
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    /// Single publish attempt
    async fn try_publish(&self, envelope: &MessageEnvelope<RoomEvent>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| BridgeError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventBroadcaster for AmqpEventBroadcaster {
    async fn publish(
        &self,
        room_id: &str,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let event = RoomEvent {
            room_id: room_id.to_string(),
            event: event_name.to_string(),
            payload,
        };
        let envelope = MessageEnvelope::new(event, room_routing_key(room_id, event_name));
        self.publish_with_retry(&envelope).await
    }
}

/// Recording broadcaster for tests
#[derive(Debug, Default)]
pub struct MockEventBroadcaster {
    published_events: std::sync::Mutex<Vec<RoomEvent>>,
    failing: AtomicBool,
}

impl MockEventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All published events, in publish order
    pub fn events(&self) -> Vec<RoomEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events published to one room
    pub fn events_for(&self, room_id: &str) -> Vec<RoomEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.room_id == room_id)
            .collect()
    }

    /// Event names published to one room, in order
    pub fn event_names_for(&self, room_id: &str) -> Vec<String> {
        self.events_for(room_id)
            .into_iter()
            .map(|event| event.event)
            .collect()
    }

    /// Number of events with the given name across all rooms
    pub fn count(&self, event_name: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.event == event_name)
            .count()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventBroadcaster for MockEventBroadcaster {
    async fn publish(
        &self,
        room_id: &str,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Upstream {
                collaborator: "broadcaster".to_string(),
                message: "mock broadcaster set to fail".to_string(),
            }
            .into());
        }

        if let Ok(mut events) = self.published_events.lock() {
            events.push(RoomEvent {
                room_id: room_id.to_string(),
                event: event_name.to_string(),
                payload,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::messages::events;

    #[test]
    fn test_publisher_config_default() {
        let config = PublisherConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 500);
        assert_eq!(config.exchange, "mood_bridge.room_events");
    }

    #[tokio::test]
    async fn test_mock_records_in_order() {
        let broadcaster = MockEventBroadcaster::new();
        broadcaster
            .publish("room-1", events::BATTLE_STARTING, serde_json::json!({}))
            .await
            .unwrap();
        broadcaster
            .publish("room-2", events::MATCH_FOUND, serde_json::json!({}))
            .await
            .unwrap();
        broadcaster
            .publish("room-1", events::BATTLE_STARTED, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(
            broadcaster.event_names_for("room-1"),
            vec![events::BATTLE_STARTING, events::BATTLE_STARTED]
        );
        assert_eq!(broadcaster.count(events::MATCH_FOUND), 1);
    }

    #[tokio::test]
    async fn test_publish_or_warn_swallows_failures() {
        #[derive(Serialize)]
        struct Ping {
            n: u32,
        }

        let broadcaster = MockEventBroadcaster::new();
        assert!(publish_or_warn(&broadcaster, "room-1", "ping", &Ping { n: 1 }).await);

        broadcaster.set_failing(true);
        assert!(!publish_or_warn(&broadcaster, "room-1", "ping", &Ping { n: 2 }).await);
        assert_eq!(broadcaster.events().len(), 1);
        assert_eq!(broadcaster.events()[0].payload["n"], 1);
    }
}
