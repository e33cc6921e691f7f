//! Utility functions for the session orchestration service

use chrono::{DateTime, Utc};
use std::sync::RwLock;
use uuid::Uuid;

/// Generate a new unique session ID
pub fn generate_session_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique battle ID
pub fn generate_battle_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique connection request ID
pub fn generate_request_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate an opaque anonymous identifier for a matching profile.
///
/// The value is random and carries nothing derived from the room id.
pub fn generate_anonymous_id() -> String {
    format!("anon_{}", Uuid::new_v4().simple())
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Wall-clock source used for expiry and retention decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        current_timestamp()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = instant;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|now| *now).unwrap_or_else(|_| current_timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_session_id();
        let id2 = generate_session_id();
        assert_ne!(id1, id2);

        let battle1 = generate_battle_id();
        let battle2 = generate_battle_id();
        assert_ne!(battle1, battle2);
    }

    #[test]
    fn test_anonymous_ids_are_opaque() {
        let anon1 = generate_anonymous_id();
        let anon2 = generate_anonymous_id();
        assert_ne!(anon1, anon2);
        assert!(anon1.starts_with("anon_"));
        assert_eq!(anon1.len(), "anon_".len() + 32);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = current_timestamp();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(301));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(301));
    }

    #[test]
    fn test_chrono_duration_conversion() {
        let converted = chrono_duration(std::time::Duration::from_secs(90));
        assert_eq!(converted, chrono::Duration::seconds(90));
    }
}
