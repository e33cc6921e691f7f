//! Common types used throughout the session orchestration service

use crate::mood::{FusedMood, MoodVector};
use crate::session::battle::BattleResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for rooms (owned by the upstream room service)
pub type RoomId = String;

/// Unique identifier for users
pub type UserId = String;

/// Unique identifier for shared sessions
pub type SessionId = Uuid;

/// Unique identifier for battles
pub type BattleId = Uuid;

/// Unique identifier for connection requests
pub type RequestId = Uuid;

/// A playable track as reported by the room directory or the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub play_count: u32,
    #[serde(default)]
    pub mood: Option<String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            play_count: 0,
            mood: None,
        }
    }

    /// Builder-style play count
    pub fn with_play_count(mut self, play_count: u32) -> Self {
        self.play_count = play_count;
        self
    }

    /// Builder-style mood tag
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }
}

/// A participant currently present in a room, with their latest mood tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub mood: String,
    pub confidence: f64,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, mood: impl Into<String>, confidence: f64) -> Self {
        Self {
            user_id: user_id.into(),
            mood: mood.into(),
            confidence,
        }
    }
}

/// Point-in-time view of a room, as served by the room directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub top_tracks: Vec<Track>,
}

/// Which side of a shared session a room sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSide {
    A,
    B,
}

impl std::fmt::Display for RoomSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomSide::A => write!(f, "A"),
            RoomSide::B => write!(f, "B"),
        }
    }
}

/// Explicit vote cast during a battle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Fire,
    Up,
    Down,
}

impl VoteKind {
    /// Engagement weight contributed by one vote
    pub fn weight(self) -> f64 {
        match self {
            VoteKind::Fire => 3.0,
            VoteKind::Up => 1.0,
            VoteKind::Down => -1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Fire => "fire",
            VoteKind::Up => "up",
            VoteKind::Down => "down",
        }
    }
}

/// Why a shared session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Requested,
    Expired,
    Shutdown,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Requested => "requested",
            EndReason::Expired => "expired",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Outbound event payloads
///
/// Emitted to both rooms once their shared session is live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConnected {
    pub session_id: SessionId,
    pub partner_room_id: RoomId,
    pub blended_mood: FusedMood,
    pub blend_ratio: f64,
    pub playlist_length: usize,
    pub expires_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// Emitted to both rooms when their shared session ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsDisconnected {
    pub session_id: SessionId,
    pub room_a: RoomId,
    pub room_b: RoomId,
    pub reason: EndReason,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when a battle is scheduled and enters its lead-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleStarting {
    pub battle_id: BattleId,
    pub session_id: SessionId,
    pub slot_count: usize,
    pub lead_in_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when the lead-in elapses and rotation begins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleStarted {
    pub battle_id: BattleId,
    pub session_id: SessionId,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Emitted at the start of every battle slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleTrackChanged {
    pub battle_id: BattleId,
    pub slot_index: usize,
    pub room_id: RoomId,
    pub track: Track,
    pub slot_duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once a battle has run all its slots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleFinished {
    pub battle_id: BattleId,
    pub session_id: SessionId,
    pub result: BattleResult,
    pub timestamp: DateTime<Utc>,
}

/// High-quality match notification from the background sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFound {
    pub anonymous_id: String,
    pub mood_label: String,
    pub similarity: f64,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Delivered to the target room; never carries the requester's room id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequestReceived {
    pub request_id: RequestId,
    pub from_anonymous_id: String,
    pub from_mood_label: String,
    pub message: String,
    pub similarity: f64,
    pub expires_at: DateTime<Utc>,
}

/// Confirmation delivered to the requesting room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequestSent {
    pub request_id: RequestId,
    pub to_anonymous_id: String,
    pub similarity: f64,
    pub expires_at: DateTime<Utc>,
}

/// Delivered to the requesting room once the target responds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequestResolved {
    pub request_id: RequestId,
    pub to_anonymous_id: String,
    pub accepted: bool,
    pub message: Option<String>,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
}

/// Emitted to a room when its matching profile picks up a new fused mood
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodUpdatedForMatching {
    pub anonymous_id: String,
    pub mood_label: String,
    pub mood_vector: MoodVector,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_weights() {
        assert_eq!(VoteKind::Fire.weight(), 3.0);
        assert_eq!(VoteKind::Up.weight(), 1.0);
        assert_eq!(VoteKind::Down.weight(), -1.0);
    }

    #[test]
    fn test_track_builder() {
        let track = Track::new("t1", "Night Drive", "Analog Sun")
            .with_play_count(42)
            .with_mood("calm");
        assert_eq!(track.play_count, 42);
        assert_eq!(track.mood.as_deref(), Some("calm"));
    }

    #[test]
    fn test_snapshot_deserializes_without_tracks() {
        let snapshot: RoomSnapshot = serde_json::from_str(
            r#"{"participants":[{"user_id":"u1","mood":"happy","confidence":0.8}]}"#,
        )
        .unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert!(snapshot.top_tracks.is_empty());
    }
}
