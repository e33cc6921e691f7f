//! Service layer for the mood-bridge orchestration service
//!
//! Application state, background task supervision and health checks for the
//! production binary.

pub mod app;
pub mod health;
pub mod supervisor;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
pub use supervisor::TaskSupervisor;
