//! Anonymous connection requests between matching profiles

use crate::types::{RequestId, RoomId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
        }
    }
}

/// Target room's answer to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDecision {
    Accept,
    Reject,
}

/// A request from one room to an anonymously discovered room.
///
/// Created pending, resolved exactly once by a response or by expiry, and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub id: RequestId,
    pub from_room_id: RoomId,
    pub to_room_id: RoomId,
    pub from_anonymous_id: String,
    pub to_anonymous_id: String,
    pub requester: String,
    pub message: String,
    pub similarity: f64,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub session_id: Option<SessionId>,
    pub response_message: Option<String>,
    /// Set while an acceptance is establishing the session
    #[serde(skip)]
    pub(crate) responding: bool,
}

impl ConnectionRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// Whether the request can no longer be answered at `now`
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move out of pending. Returns false if the request was already resolved.
    pub(crate) fn resolve(&mut self, status: RequestStatus, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = status;
        self.resolved_at = Some(now);
        self.responding = false;
        true
    }

    /// Resolved requests past their retention window can be dropped
    pub fn is_collectable(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        match self.resolved_at {
            Some(resolved_at) => now - resolved_at >= retention,
            None => false,
        }
    }
}
