//! Mood Bridge - session orchestration for mood-linked chat and music rooms
//!
//! This crate fuses participant moods into a room mood, matches rooms by
//! mood similarity, and joins matched rooms into shared sessions where they
//! can run timed music battles. Events fan out over AMQP or an in-process
//! broadcaster.

pub mod amqp;
pub mod config;
pub mod directory;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod mood;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{error_kind, BridgeError, ErrorKind, Result};
pub use types::*;

// Re-export key components
pub use amqp::{EventBroadcaster, LocalBroadcaster};
pub use matching::MatchingEngine;
pub use mood::{fuse, FusedMood, MoodVector};
pub use service::AppState;
pub use session::SessionManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
