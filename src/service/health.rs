//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the mood-bridge
//! service, including readiness and liveness probes.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Combine two statuses, keeping the worse one
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub active_sessions: usize,
    pub active_battles: usize,
    pub sessions_created: u64,
    pub battles_finished: u64,
    pub registered_profiles: usize,
    pub pending_requests: usize,
    pub high_quality_matches: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: &AppState) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(app_state).await,
            Self::check_session_manager(app_state),
            Self::check_matching_engine(app_state),
            Self::check_broadcaster(app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| {
                status.worst(check.status.clone())
            });

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(app_state),
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: &AppState) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service is running and both cores answer
    pub async fn readiness_check(app_state: &AppState) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_session_manager(app_state)
            .status
            .worst(Self::check_matching_engine(app_state).status))
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_session_manager(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.sessions().stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Session manager stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "session_manager".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_matching_engine(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.matching().stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Matching engine stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "matching_engine".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// A lost broker connection degrades the service; room commands and
    /// events stop flowing but in-memory state is intact
    fn check_broadcaster(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.amqp_connected() {
            Some(true) => (HealthStatus::Healthy, None),
            Some(false) => (
                HealthStatus::Degraded,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("In-process broadcaster".to_string()),
            ),
        };

        ComponentCheck {
            name: "broadcaster".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_seconds: app_state.uptime().as_secs(),
            ..ServiceStats::default()
        };

        match app_state.sessions().stats() {
            Ok(sessions) => {
                stats.active_sessions = sessions.active_sessions;
                stats.active_battles = sessions.active_battles;
                stats.sessions_created = sessions.sessions_created;
                stats.battles_finished = sessions.battles_finished;
            }
            Err(e) => debug!("Failed to get session stats for health check: {}", e),
        }

        match app_state.matching().stats() {
            Ok(matching) => {
                stats.registered_profiles = matching.registered_profiles;
                stats.pending_requests = matching.pending_requests;
                stats.high_quality_matches = matching.high_quality_matches;
            }
            Err(e) => debug!("Failed to get matching stats for health check: {}", e),
        }

        stats
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::Arc;

    async fn local_state() -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        config.service.health_port = 0;
        Arc::new(AppState::new(config).await.unwrap())
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let state = local_state().await;
        let health = HealthCheck::check(&state).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(
            HealthCheck::readiness_check(&state).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_running_service_is_healthy() {
        let state = local_state().await;
        state.start().await.unwrap();

        let health = HealthCheck::check(&state).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.service, "mood-bridge");
        assert!(health.checks.iter().any(|check| check.name == "broadcaster"));
        assert!(health.to_json().unwrap().contains("active_sessions"));

        state.shutdown().await.unwrap();
    }
}
