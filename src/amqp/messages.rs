//! AMQP message definitions and serialization

use crate::config::{MAX_DURATION_SECONDS, MAX_REQUEST_MESSAGE_CHARS};
use crate::error::{BridgeError, Result};
use crate::matching::{MatchingOptions, ResponseDecision};
use crate::session::{BattleOptions, ConnectOptions};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Default AMQP names
pub const ROOM_COMMANDS_QUEUE: &str = "mood_bridge.room_commands";
pub const ROOM_EVENTS_EXCHANGE: &str = "mood_bridge.room_events";

/// Outbound event names, stable across releases
pub mod events {
    pub const ROOM_CONNECTED: &str = "room-connected";
    pub const ROOMS_DISCONNECTED: &str = "rooms-disconnected";
    pub const BATTLE_STARTING: &str = "battle-starting";
    pub const BATTLE_STARTED: &str = "battle-started";
    pub const BATTLE_TRACK_CHANGED: &str = "battle-track-changed";
    pub const BATTLE_FINISHED: &str = "battle-finished";
    pub const MATCH_FOUND: &str = "match-found";
    pub const CONNECTION_REQUEST_RECEIVED: &str = "connection-request-received";
    pub const CONNECTION_REQUEST_SENT: &str = "connection-request-sent";
    pub const CONNECTION_REQUEST_ACCEPTED: &str = "connection-request-accepted";
    pub const CONNECTION_REQUEST_REJECTED: &str = "connection-request-rejected";
    pub const MOOD_UPDATED_FOR_MATCHING: &str = "mood-updated-for-matching";
}

/// Routing key for an event addressed to one room
pub fn room_routing_key(room_id: &str, event_name: &str) -> String {
    format!("room.{}.{}", room_id, event_name)
}

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            BridgeError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            BridgeError::Validation {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// A named event delivered to every subscriber of a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub room_id: RoomId,
    pub event: String,
    pub payload: serde_json::Value,
}

/// Inbound commands from the upstream transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RoomCommand {
    /// Push the current participants and top tracks of a room
    SyncRoom {
        room_id: RoomId,
        participants: Vec<Participant>,
        #[serde(default)]
        top_tracks: Vec<Track>,
    },
    RegisterForMatching {
        room_id: RoomId,
        #[serde(default)]
        options: MatchingOptions,
    },
    UnregisterFromMatching {
        room_id: RoomId,
    },
    FindMatches {
        room_id: RoomId,
        #[serde(default)]
        threshold: Option<f64>,
    },
    RequestConnection {
        from_room_id: RoomId,
        to_anonymous_id: String,
        requester: UserId,
        #[serde(default)]
        message: String,
    },
    RespondToRequest {
        request_id: RequestId,
        room_id: RoomId,
        responder: UserId,
        decision: ResponseDecision,
        #[serde(default)]
        message: Option<String>,
    },
    ConnectRooms {
        room_a: RoomId,
        room_b: RoomId,
        initiator: UserId,
        #[serde(default)]
        options: ConnectOptions,
    },
    DisconnectRooms {
        session_id: SessionId,
    },
    StartBattle {
        session_id: SessionId,
        #[serde(default)]
        options: BattleOptions,
    },
    CastVote {
        battle_id: BattleId,
        room_id: RoomId,
        voter: UserId,
        vote: VoteKind,
    },
}

impl RoomCommand {
    /// Short name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            RoomCommand::SyncRoom { .. } => "sync_room",
            RoomCommand::RegisterForMatching { .. } => "register_for_matching",
            RoomCommand::UnregisterFromMatching { .. } => "unregister_from_matching",
            RoomCommand::FindMatches { .. } => "find_matches",
            RoomCommand::RequestConnection { .. } => "request_connection",
            RoomCommand::RespondToRequest { .. } => "respond_to_request",
            RoomCommand::ConnectRooms { .. } => "connect_rooms",
            RoomCommand::DisconnectRooms { .. } => "disconnect_rooms",
            RoomCommand::StartBattle { .. } => "start_battle",
            RoomCommand::CastVote { .. } => "cast_vote",
        }
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Deserialize and validate a room command
    pub fn deserialize_command(bytes: &[u8]) -> Result<RoomCommand> {
        let command: RoomCommand =
            serde_json::from_slice(bytes).map_err(|e| BridgeError::Validation {
                reason: format!("Failed to deserialize room command: {}", e),
            })?;

        Self::validate_command(&command)?;
        Ok(command)
    }

    /// Reject malformed commands before they reach the core
    pub fn validate_command(command: &RoomCommand) -> Result<()> {
        fn require(value: &str, field: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(BridgeError::validation(format!("{} cannot be empty", field)).into());
            }
            Ok(())
        }

        match command {
            RoomCommand::SyncRoom {
                room_id,
                participants,
                ..
            } => {
                require(room_id, "Room ID")?;
                for participant in participants {
                    require(&participant.user_id, "Participant user ID")?;
                }
            }
            RoomCommand::RegisterForMatching { room_id, options } => {
                require(room_id, "Room ID")?;
                options.validate()?;
            }
            RoomCommand::UnregisterFromMatching { room_id } => require(room_id, "Room ID")?,
            RoomCommand::FindMatches { room_id, threshold } => {
                require(room_id, "Room ID")?;
                if let Some(threshold) = threshold {
                    if !(0.0..=1.0).contains(threshold) {
                        return Err(BridgeError::validation(
                            "Similarity threshold must be within [0, 1]",
                        )
                        .into());
                    }
                }
            }
            RoomCommand::RequestConnection {
                from_room_id,
                to_anonymous_id,
                requester,
                message,
            } => {
                require(from_room_id, "Room ID")?;
                require(to_anonymous_id, "Anonymous ID")?;
                require(requester, "Requester")?;
                if message.chars().count() > MAX_REQUEST_MESSAGE_CHARS {
                    return Err(BridgeError::validation(format!(
                        "Request message cannot exceed {} characters",
                        MAX_REQUEST_MESSAGE_CHARS
                    ))
                    .into());
                }
            }
            RoomCommand::RespondToRequest {
                room_id, responder, ..
            } => {
                require(room_id, "Room ID")?;
                require(responder, "Responder")?;
            }
            RoomCommand::ConnectRooms {
                room_a,
                room_b,
                initiator,
                options,
            } => {
                require(room_a, "Room A")?;
                require(room_b, "Room B")?;
                require(initiator, "Initiator")?;
                if room_a == room_b {
                    return Err(BridgeError::validation("A room cannot connect to itself").into());
                }
                options.validate(MAX_DURATION_SECONDS)?;
            }
            RoomCommand::StartBattle { options, .. } => options.validate(MAX_DURATION_SECONDS)?,
            RoomCommand::DisconnectRooms { .. } => {}
            RoomCommand::CastVote { room_id, voter, .. } => {
                require(room_id, "Room ID")?;
                require(voter, "Voter")?;
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            BridgeError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};

    #[test]
    fn test_message_envelope_creation() {
        let event = RoomEvent {
            room_id: "room-1".to_string(),
            event: events::MATCH_FOUND.to_string(),
            payload: serde_json::json!({"similarity": 0.9}),
        };
        let envelope = MessageEnvelope::new(event, room_routing_key("room-1", events::MATCH_FOUND));

        assert_eq!(envelope.routing_key, "room.room-1.match-found");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_command_deserialization() {
        let bytes = br#"{
            "command": "sync_room",
            "room_id": "room-1",
            "participants": [{"user_id": "u1", "mood": "happy", "confidence": 0.8}]
        }"#;
        let command = MessageUtils::deserialize_command(bytes).unwrap();
        assert_eq!(command.name(), "sync_room");

        let bytes = br#"{
            "command": "cast_vote",
            "battle_id": "5f0c7f2e-0a7c-4c50-9d3c-6f5e4a8d2b11",
            "room_id": "room-1",
            "voter": "u1",
            "vote": "fire"
        }"#;
        match MessageUtils::deserialize_command(bytes).unwrap() {
            RoomCommand::CastVote { vote, .. } => assert_eq!(vote, VoteKind::Fire),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_command_validation() {
        let err = MessageUtils::deserialize_command(
            br#"{"command": "connect_rooms", "room_a": "r1", "room_b": "r1", "initiator": "u1"}"#,
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));

        let err = MessageUtils::deserialize_command(
            br#"{"command": "connect_rooms", "room_a": "r1", "room_b": "r2", "initiator": "u1",
                "options": {"duration_seconds": 9223372036854775807}}"#,
        )
        .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));

        let command = RoomCommand::StartBattle {
            session_id: uuid::Uuid::new_v4(),
            options: BattleOptions {
                duration_seconds: Some(MAX_DURATION_SECONDS + 1),
            },
        };
        assert!(MessageUtils::validate_command(&command).is_err());

        let long_message = "x".repeat(MAX_REQUEST_MESSAGE_CHARS + 1);
        let command = RoomCommand::RequestConnection {
            from_room_id: "r1".to_string(),
            to_anonymous_id: "anon_1".to_string(),
            requester: "u1".to_string(),
            message: long_message,
        };
        assert!(MessageUtils::validate_command(&command).is_err());

        let command = RoomCommand::FindMatches {
            room_id: "r1".to_string(),
            threshold: Some(1.2),
        };
        assert!(MessageUtils::validate_command(&command).is_err());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = MessageUtils::deserialize_command(br#"{"command": "launch_rockets"}"#)
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
    }
}
