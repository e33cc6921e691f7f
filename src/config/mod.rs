//! Configuration management for the mood-bridge service
//!
//! This module handles configuration loading from TOML files and environment
//! variables, validation, and default values for the orchestration core.

pub mod app;
pub mod matching;
pub mod session;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, ServiceSettings};
pub use matching::{MatchingConfig, MAX_REQUEST_MESSAGE_CHARS, REQUEST_TTL};
pub use session::{SessionConfig, MAX_DURATION_SECONDS};
