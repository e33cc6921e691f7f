//! Shared session state and the connect seam used by the matching engine

use crate::error::{BridgeError, Result};
use crate::mood::FusedMood;
use crate::types::{EndReason, Participant, RoomId, SessionId, Track};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a shared session. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Ended,
}

/// Caller options for connecting two rooms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Session lifetime; the configured default applies when unset
    pub duration_seconds: Option<u64>,
}

/// Caller options for starting a battle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BattleOptions {
    /// Total rotation time, excluding the lead-in
    pub duration_seconds: Option<u64>,
}

impl ConnectOptions {
    /// Reject a requested lifetime that is zero or above `max_seconds`
    pub fn validate(&self, max_seconds: u64) -> Result<()> {
        check_duration("Session", self.duration_seconds, max_seconds)
    }
}

impl BattleOptions {
    /// Reject a requested battle length that is zero or above `max_seconds`
    pub fn validate(&self, max_seconds: u64) -> Result<()> {
        check_duration("Battle", self.duration_seconds, max_seconds)
    }
}

fn check_duration(what: &str, duration_seconds: Option<u64>, max_seconds: u64) -> Result<()> {
    match duration_seconds {
        Some(0) => {
            Err(BridgeError::validation(format!("{} duration must be positive", what)).into())
        }
        Some(seconds) if seconds > max_seconds => Err(BridgeError::validation(format!(
            "{} duration of {}s exceeds the maximum of {}s",
            what, seconds, max_seconds
        ))
        .into()),
        _ => Ok(()),
    }
}

/// Two rooms merged into one temporary session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedSession {
    pub id: SessionId,
    pub room_a: RoomId,
    pub room_b: RoomId,
    pub initiator: String,
    /// Room A's participants followed by room B's
    pub participants: Vec<Participant>,
    pub participant_count_a: usize,
    pub blended_mood: FusedMood,
    pub blend_ratio: f64,
    pub playlist: Vec<Track>,
    pub status: SessionStatus,
    pub duration_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl SharedSession {
    /// A session reserved for two rooms while their snapshots are fetched
    pub fn connecting(
        id: SessionId,
        room_a: RoomId,
        room_b: RoomId,
        initiator: String,
        duration_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            room_a,
            room_b,
            initiator,
            participants: Vec::new(),
            participant_count_a: 0,
            blended_mood: FusedMood::neutral(),
            blend_ratio: 0.5,
            playlist: Vec::new(),
            status: SessionStatus::Connecting,
            duration_seconds,
            created_at: now,
            connected_at: None,
            expires_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.room_a == room_id || self.room_b == room_id
    }

    /// The other member of the session
    pub fn partner_of(&self, room_id: &str) -> Option<&str> {
        if self.room_a == room_id {
            Some(&self.room_b)
        } else if self.room_b == room_id {
            Some(&self.room_a)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != SessionStatus::Ended
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// Transition to `Ended`. Returns false if it had already ended.
    pub(crate) fn end(&mut self, reason: EndReason, now: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Ended {
            return false;
        }
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
        true
    }
}

/// Fraction of the merged participants contributed by room A
pub fn blend_ratio(count_a: usize, count_b: usize) -> f64 {
    let total = count_a + count_b;
    if total == 0 {
        return 0.5;
    }
    count_a as f64 / total as f64
}

/// Establishes a shared session between two rooms
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        room_a: &str,
        room_b: &str,
        initiator: &str,
        options: ConnectOptions,
    ) -> Result<SessionId>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_session_id;

    #[test]
    fn test_duration_options_bounded() {
        assert!(ConnectOptions::default().validate(60).is_ok());
        assert!(ConnectOptions { duration_seconds: Some(60) }.validate(60).is_ok());
        assert!(ConnectOptions { duration_seconds: Some(0) }.validate(60).is_err());
        assert!(ConnectOptions { duration_seconds: Some(61) }.validate(60).is_err());
        assert!(BattleOptions { duration_seconds: Some(u64::MAX) }.validate(60).is_err());
    }

    #[test]
    fn test_blend_ratio() {
        assert_eq!(blend_ratio(2, 2), 0.5);
        assert_eq!(blend_ratio(3, 1), 0.75);
        assert_eq!(blend_ratio(0, 0), 0.5);
    }

    #[test]
    fn test_end_is_terminal() {
        let now = Utc::now();
        let mut session = SharedSession::connecting(
            generate_session_id(),
            "room-a".to_string(),
            "room-b".to_string(),
            "alice".to_string(),
            1800,
            now,
        );
        assert!(session.is_active());
        assert_eq!(session.partner_of("room-b"), Some("room-a"));
        assert_eq!(session.partner_of("room-c"), None);

        assert!(session.end(EndReason::Requested, now));
        assert!(!session.end(EndReason::Expired, now));
        assert_eq!(session.end_reason, Some(EndReason::Requested));
        assert!(!session.is_active());
    }
}
