//! Inbound room command handling
//!
//! Commands arrive as JSON on an AMQP queue, are validated, dispatched into
//! the matching engine or session manager, and answered on the `reply_to`
//! queue of the delivery when one is set.

use crate::amqp::messages::{MessageUtils, RoomCommand};
use crate::directory::{InMemoryRoomDirectory, RoomDirectory};
use crate::error::{error_kind, BridgeError, ErrorKind, Result};
use crate::matching::MatchingEngine;
use crate::metrics::MetricsCollector;
use crate::mood::fuse_participants;
use crate::session::SessionManager;
use crate::types::{ConnectionRequestSent, RoomSnapshot};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicPublishArguments,
        Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Failure part of a [`CommandReply`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Answer to one inbound command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub result: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandFailure>,
}

impl CommandReply {
    pub fn success(command: &str, result: serde_json::Value) -> Self {
        Self {
            command: command.to_string(),
            ok: true,
            result,
            error: None,
        }
    }

    /// Build a failed reply, classifying the error. Untyped errors are
    /// reported as internal.
    pub fn failure(command: &str, error: &anyhow::Error) -> Self {
        Self {
            command: command.to_string(),
            ok: false,
            result: serde_json::Value::Null,
            error: Some(CommandFailure {
                kind: error_kind(error).unwrap_or(ErrorKind::Internal),
                message: error.to_string(),
            }),
        }
    }
}

/// Trait defining the interface for handling room commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Apply a validated command to the core
    async fn handle_command(&self, command: RoomCommand) -> Result<CommandReply>;

    /// Handle a delivery that could not be turned into a command
    async fn handle_error(&self, error: BridgeError, message_data: &[u8]);
}

/// Dispatches commands into the room directory, matching engine and session
/// manager
#[derive(Clone)]
pub struct CoreCommandHandler {
    directory: Arc<InMemoryRoomDirectory>,
    matching: MatchingEngine,
    sessions: SessionManager,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CoreCommandHandler {
    pub fn new(
        directory: Arc<InMemoryRoomDirectory>,
        matching: MatchingEngine,
        sessions: SessionManager,
    ) -> Self {
        Self {
            directory,
            matching,
            sessions,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn dispatch(&self, command: RoomCommand) -> Result<serde_json::Value> {
        match command {
            RoomCommand::SyncRoom {
                room_id,
                participants,
                top_tracks,
            } => {
                let fusion_timer = Instant::now();
                let fused = fuse_participants(&participants);
                if let Some(metrics) = &self.metrics {
                    metrics.record_fusion(fusion_timer.elapsed());
                }

                let participant_count = participants.len();
                self.directory.upsert_room(
                    room_id.clone(),
                    RoomSnapshot {
                        participants,
                        top_tracks,
                    },
                )?;

                let registered = self.matching.get_profile(&room_id)?.is_some();
                if registered && participant_count > 0 {
                    self.matching
                        .update_mood(&room_id, &fused, participant_count)
                        .await?;
                }

                Ok(json!({
                    "room_id": room_id,
                    "participant_count": participant_count,
                    "mood": fused,
                }))
            }
            RoomCommand::RegisterForMatching { room_id, options } => {
                let snapshot = self.directory.get_room_snapshot(&room_id).await?;
                let mood = if snapshot.participants.is_empty() {
                    None
                } else {
                    Some(fuse_participants(&snapshot.participants))
                };
                let anonymous_id = self.matching.register(
                    &room_id,
                    mood.as_ref(),
                    snapshot.participants.len(),
                    options,
                )?;
                Ok(json!({ "anonymous_id": anonymous_id }))
            }
            RoomCommand::UnregisterFromMatching { room_id } => {
                let removed = self.matching.unregister(&room_id)?;
                Ok(json!({ "removed": removed }))
            }
            RoomCommand::FindMatches { room_id, threshold } => {
                let matches = self.matching.find_matches(&room_id, threshold)?;
                Ok(json!({ "matches": matches }))
            }
            RoomCommand::RequestConnection {
                from_room_id,
                to_anonymous_id,
                requester,
                message,
            } => {
                let request = self
                    .matching
                    .request_connection(&from_room_id, &to_anonymous_id, &requester, &message)
                    .await?;
                // The requester only ever sees the anonymous side of the target
                let sent = ConnectionRequestSent {
                    request_id: request.id,
                    to_anonymous_id: request.to_anonymous_id,
                    similarity: request.similarity,
                    expires_at: request.expires_at,
                };
                Ok(serde_json::to_value(sent)?)
            }
            RoomCommand::RespondToRequest {
                request_id,
                room_id,
                responder,
                decision,
                message,
            } => {
                let request = self
                    .matching
                    .respond_to_request(request_id, &room_id, &responder, decision, message)
                    .await?;
                Ok(json!({
                    "request_id": request.id,
                    "status": request.status,
                    "session_id": request.session_id,
                }))
            }
            RoomCommand::ConnectRooms {
                room_a,
                room_b,
                initiator,
                options,
            } => {
                let session = self
                    .sessions
                    .connect_rooms(&room_a, &room_b, &initiator, options)
                    .await?;
                Ok(serde_json::to_value(session)?)
            }
            RoomCommand::DisconnectRooms { session_id } => {
                let session = self.sessions.disconnect_rooms(session_id).await?;
                Ok(serde_json::to_value(session)?)
            }
            RoomCommand::StartBattle {
                session_id,
                options,
            } => {
                let battle = self.sessions.start_battle(session_id, options).await?;
                Ok(serde_json::to_value(battle)?)
            }
            RoomCommand::CastVote {
                battle_id,
                room_id,
                voter,
                vote,
            } => {
                self.sessions.record_vote(battle_id, &room_id, &voter, vote)?;
                Ok(json!({ "battle_id": battle_id, "vote": vote }))
            }
        }
    }
}

#[async_trait]
impl CommandHandler for CoreCommandHandler {
    async fn handle_command(&self, command: RoomCommand) -> Result<CommandReply> {
        let name = command.name();
        let timer = Instant::now();
        let outcome = self.dispatch(command).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_command(name, outcome.is_ok(), timer.elapsed());
        }

        match outcome {
            Ok(result) => {
                debug!("Command {} handled in {:?}", name, timer.elapsed());
                Ok(CommandReply::success(name, result))
            }
            Err(e) => {
                info!("Command {} rejected: {}", name, e);
                Ok(CommandReply::failure(name, &e))
            }
        }
    }

    async fn handle_error(&self, error: BridgeError, message_data: &[u8]) {
        warn!(
            "Discarding undecodable command ({} bytes): {}",
            message_data.len(),
            error
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_command("undecodable", false, std::time::Duration::ZERO);
        }
    }
}

/// Decode one delivery and run it through `handler`.
///
/// Always produces a reply; malformed payloads are reported to the handler
/// and answered with a validation failure.
pub async fn process_delivery(handler: &dyn CommandHandler, content: &[u8]) -> CommandReply {
    let command = match MessageUtils::deserialize_command(content) {
        Ok(command) => command,
        Err(e) => {
            let reply = CommandReply::failure("unknown", &e);
            let error = match e.downcast::<BridgeError>() {
                Ok(error) => error,
                Err(other) => BridgeError::validation(other.to_string()),
            };
            handler.handle_error(error, content).await;
            return reply;
        }
    };

    let name = command.name();
    match handler.handle_command(command).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Handler failed on {}: {}", name, e);
            CommandReply::failure(name, &e)
        }
    }
}

/// Consumer for the room command queue
pub struct RoomCommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl RoomCommandConsumer {
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("room-command-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    /// Start consuming commands from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(CommandConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| BridgeError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming room commands from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming commands
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| BridgeError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming room commands");
        Ok(())
    }
}

struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
}

impl CommandConsumer {
    fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self { handler }
    }

    async fn send_reply(
        &self,
        channel: &Channel,
        properties: &BasicProperties,
        reply: &CommandReply,
    ) -> Result<()> {
        let Some(reply_to) = properties.reply_to() else {
            return Ok(());
        };

        let payload = MessageUtils::serialize_message(reply)?;
        let mut reply_properties = BasicProperties::default();
        reply_properties.with_content_type("application/json");
        if let Some(correlation_id) = properties.correlation_id() {
            reply_properties.with_correlation_id(correlation_id);
        }

        channel
            .basic_publish(
                reply_properties,
                payload,
                BasicPublishArguments::new("", reply_to),
            )
            .await
            .map_err(|e| BridgeError::AmqpConnectionFailed {
                message: format!("Failed to publish command reply: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl AsyncConsumer for CommandConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        let start_time = Instant::now();

        debug!(
            "AMQP command received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        let reply = process_delivery(self.handler.as_ref(), &content).await;

        if let Err(e) = self.send_reply(channel, &basic_properties, &reply).await {
            warn!("Failed to reply to {} command: {}", reply.command, e);
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack delivery {}: {}", delivery_tag, e);
        }

        info!(
            "Command {} processed - delivery_tag: {}, ok: {}, processing_time: {:.2}ms",
            reply.command,
            delivery_tag,
            reply.ok,
            start_time.elapsed().as_secs_f64() * 1000.0
        );
    }
}
