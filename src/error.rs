//! Error types for the session orchestration service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Typed failures are raised as [`BridgeError`] and
//! can be recovered from an `anyhow::Error` with `downcast_ref`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Coarse error taxonomy reported to upstream callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input, rejected before any state mutation
    Validation,
    /// Room, session, battle, profile or request unknown or expired
    NotFound,
    /// Room already connected, battle already running, wrong lifecycle state
    Conflict,
    /// Target room cannot accept the requester per its size bounds
    Capacity,
    /// Room directory, persistence or broker collaborator failed
    Upstream,
    /// Lock poisoning or other internal faults
    Internal,
}

/// Custom error types for specific orchestration scenarios
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("Room has no mood data yet: {room_id}")]
    NoMoodData { room_id: String },

    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("Matching profile not found: {reference}")]
    ProfileNotFound { reference: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Battle not found: {battle_id}")]
    BattleNotFound { battle_id: String },

    #[error("Connection request not found: {request_id}")]
    RequestNotFound { request_id: String },

    #[error("Connection request expired: {request_id}")]
    RequestExpired { request_id: String },

    #[error("Room is already connected: {room_id}")]
    AlreadyConnected { room_id: String },

    #[error("Battle already running for session: {session_id}")]
    BattleInProgress { session_id: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Room cannot accept connection: {room_id} ({reason})")]
    CapacityExceeded { room_id: String, reason: String },

    #[error("Upstream {collaborator} failed: {message}")]
    Upstream {
        collaborator: String,
        message: String,
    },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl BridgeError {
    /// Map the variant onto the caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Validation { .. } | BridgeError::NoMoodData { .. } => {
                ErrorKind::Validation
            }
            BridgeError::RoomNotFound { .. }
            | BridgeError::ProfileNotFound { .. }
            | BridgeError::SessionNotFound { .. }
            | BridgeError::BattleNotFound { .. }
            | BridgeError::RequestNotFound { .. }
            | BridgeError::RequestExpired { .. } => ErrorKind::NotFound,
            BridgeError::AlreadyConnected { .. }
            | BridgeError::BattleInProgress { .. }
            | BridgeError::InvalidState { .. } => ErrorKind::Conflict,
            BridgeError::CapacityExceeded { .. } => ErrorKind::Capacity,
            BridgeError::Upstream { .. } | BridgeError::AmqpConnectionFailed { .. } => {
                ErrorKind::Upstream
            }
            BridgeError::ConfigurationError { .. } | BridgeError::InternalError { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Shorthand for validation failures
    pub fn validation(reason: impl Into<String>) -> Self {
        BridgeError::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for poisoned locks and other internal faults
    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::InternalError {
            message: message.into(),
        }
    }
}

/// Classify an `anyhow::Error`, if it carries a [`BridgeError`]
pub fn error_kind(error: &anyhow::Error) -> Option<ErrorKind> {
    error.downcast_ref::<BridgeError>().map(BridgeError::kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = BridgeError::AlreadyConnected {
            room_id: "room-a".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = BridgeError::RequestExpired {
            request_id: "req".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = BridgeError::NoMoodData {
            room_id: "room-a".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_kind_through_anyhow() {
        let err: anyhow::Error = BridgeError::CapacityExceeded {
            room_id: "room-b".to_string(),
            reason: "too many participants".to_string(),
        }
        .into();
        assert_eq!(error_kind(&err), Some(ErrorKind::Capacity));

        let other = anyhow::anyhow!("plain failure");
        assert_eq!(error_kind(&other), None);
    }
}
