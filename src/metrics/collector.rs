//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the mood-bridge service:
//! shared sessions, battles, ambient matching, command handling and service
//! health.

use crate::types::{EndReason, RoomSide, VoteKind};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the orchestration service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Shared session metrics
    session_metrics: SessionMetrics,

    /// Battle metrics
    battle_metrics: BattleMetrics,

    /// Ambient matching metrics
    matching_metrics: MatchingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total inbound commands processed
    pub commands_total: IntCounterVec,

    /// Total AMQP operations
    pub amqp_messages_total: IntCounterVec,

    /// AMQP operation errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Shared session metrics
#[derive(Clone)]
pub struct SessionMetrics {
    /// Sessions currently connected
    pub active_sessions: IntGauge,

    /// Total sessions connected
    pub sessions_connected_total: IntCounter,

    /// Total sessions ended, by reason
    pub sessions_ended_total: IntCounterVec,

    /// Failed connect attempts, by error kind
    pub connect_failures_total: IntCounterVec,

    /// How long sessions stayed connected
    pub session_lifetime_seconds: Histogram,
}

/// Battle metrics
#[derive(Clone)]
pub struct BattleMetrics {
    /// Battles currently starting or active
    pub active_battles: IntGauge,

    /// Total battles started
    pub battles_started_total: IntCounter,

    /// Total battles finished, by winning side
    pub battles_finished_total: IntCounterVec,

    /// Battles cancelled before finishing
    pub battles_cancelled_total: IntCounter,

    /// Votes cast, by kind
    pub votes_total: IntCounterVec,

    /// Distance between first and last mood sample
    pub mood_movement: Histogram,
}

/// Ambient matching metrics
#[derive(Clone)]
pub struct MatchingMetrics {
    /// Profiles currently registered
    pub registered_profiles: IntGauge,

    /// Total similarity searches
    pub searches_total: IntCounter,

    /// Match-found notifications from the sweep
    pub high_quality_matches_total: IntCounter,

    /// Connection requests, by final status
    pub requests_total: IntCounterVec,

    /// Profiles evicted by the expiry sweep
    pub profiles_evicted_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Mood fusion time
    pub fusion_duration: Histogram,

    /// Similarity search time
    pub match_search_duration: Histogram,

    /// Command handling time
    pub command_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let session_metrics = SessionMetrics::new(&registry)?;
        let battle_metrics = BattleMetrics::new(&registry)?;
        let matching_metrics = MatchingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            session_metrics,
            battle_metrics,
            matching_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn session(&self) -> &SessionMetrics {
        &self.session_metrics
    }

    pub fn battle(&self) -> &BattleMetrics {
        &self.battle_metrics
    }

    pub fn matching(&self) -> &MatchingMetrics {
        &self.matching_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a shared session going live
    pub fn record_session_connected(&self) {
        self.session_metrics.sessions_connected_total.inc();
        self.session_metrics.active_sessions.inc();
    }

    /// Record a shared session ending
    pub fn record_session_ended(&self, reason: EndReason, lifetime: Duration) {
        self.session_metrics
            .sessions_ended_total
            .with_label_values(&[reason.as_str()])
            .inc();
        self.session_metrics.active_sessions.dec();
        self.session_metrics
            .session_lifetime_seconds
            .observe(lifetime.as_secs_f64());
    }

    /// Record a failed connect attempt
    pub fn record_connect_failure(&self, kind: &str) {
        self.session_metrics
            .connect_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn record_battle_started(&self) {
        self.battle_metrics.battles_started_total.inc();
        self.battle_metrics.active_battles.inc();
    }

    pub fn record_battle_finished(&self, winner: RoomSide, mood_movement: f64) {
        let side = match winner {
            RoomSide::A => "a",
            RoomSide::B => "b",
        };
        self.battle_metrics
            .battles_finished_total
            .with_label_values(&[side])
            .inc();
        self.battle_metrics.active_battles.dec();
        self.battle_metrics.mood_movement.observe(mood_movement);
    }

    pub fn record_battle_cancelled(&self) {
        self.battle_metrics.battles_cancelled_total.inc();
        self.battle_metrics.active_battles.dec();
    }

    pub fn record_vote(&self, vote: VoteKind) {
        self.battle_metrics
            .votes_total
            .with_label_values(&[vote.as_str()])
            .inc();
    }

    /// Record a similarity search
    pub fn record_match_search(&self, duration: Duration) {
        self.matching_metrics.searches_total.inc();
        self.performance_metrics
            .match_search_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_high_quality_match(&self) {
        self.matching_metrics.high_quality_matches_total.inc();
    }

    /// Record a connection request reaching a status
    pub fn record_request(&self, status: &str) {
        self.matching_metrics
            .requests_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_profiles_evicted(&self, count: usize) {
        self.matching_metrics
            .profiles_evicted_total
            .inc_by(count as u64);
    }

    pub fn set_registered_profiles(&self, count: usize) {
        self.matching_metrics
            .registered_profiles
            .set(count as i64);
    }

    pub fn record_fusion(&self, duration: Duration) {
        self.performance_metrics
            .fusion_duration
            .observe(duration.as_secs_f64());
    }

    /// Record an inbound command
    pub fn record_command(&self, command: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();

        self.performance_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("mood_bridge_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("mood_bridge_commands_total", "Total room commands processed"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "mood_bridge_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("mood_bridge_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "mood_bridge_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("mood_bridge_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            commands_total,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_sessions = IntGauge::new(
            "mood_bridge_active_sessions",
            "Shared sessions currently connected",
        )?;
        registry.register(Box::new(active_sessions.clone()))?;

        let sessions_connected_total = IntCounter::new(
            "mood_bridge_sessions_connected_total",
            "Total shared sessions connected",
        )?;
        registry.register(Box::new(sessions_connected_total.clone()))?;

        let sessions_ended_total = IntCounterVec::new(
            Opts::new("mood_bridge_sessions_ended_total", "Total shared sessions ended"),
            &["reason"],
        )?;
        registry.register(Box::new(sessions_ended_total.clone()))?;

        let connect_failures_total = IntCounterVec::new(
            Opts::new(
                "mood_bridge_connect_failures_total",
                "Failed room connect attempts",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(connect_failures_total.clone()))?;

        let session_lifetime_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mood_bridge_session_lifetime_seconds",
                "Time shared sessions stayed connected",
            )
            .buckets(vec![30.0, 60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0]),
        )?;
        registry.register(Box::new(session_lifetime_seconds.clone()))?;

        Ok(Self {
            active_sessions,
            sessions_connected_total,
            sessions_ended_total,
            connect_failures_total,
            session_lifetime_seconds,
        })
    }
}

impl BattleMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_battles = IntGauge::new(
            "mood_bridge_active_battles",
            "Battles currently starting or active",
        )?;
        registry.register(Box::new(active_battles.clone()))?;

        let battles_started_total =
            IntCounter::new("mood_bridge_battles_started_total", "Total battles started")?;
        registry.register(Box::new(battles_started_total.clone()))?;

        let battles_finished_total = IntCounterVec::new(
            Opts::new(
                "mood_bridge_battles_finished_total",
                "Total battles finished by winning side",
            ),
            &["winner"],
        )?;
        registry.register(Box::new(battles_finished_total.clone()))?;

        let battles_cancelled_total = IntCounter::new(
            "mood_bridge_battles_cancelled_total",
            "Battles cancelled before finishing",
        )?;
        registry.register(Box::new(battles_cancelled_total.clone()))?;

        let votes_total = IntCounterVec::new(
            Opts::new("mood_bridge_votes_total", "Battle votes cast"),
            &["vote"],
        )?;
        registry.register(Box::new(votes_total.clone()))?;

        let mood_movement = Histogram::with_opts(
            HistogramOpts::new(
                "mood_bridge_battle_mood_movement",
                "Distance between first and last battle mood sample",
            )
            .buckets(vec![0.05, 0.1, 0.2, 0.4, 0.8, 1.6, 2.9]),
        )?;
        registry.register(Box::new(mood_movement.clone()))?;

        Ok(Self {
            active_battles,
            battles_started_total,
            battles_finished_total,
            battles_cancelled_total,
            votes_total,
            mood_movement,
        })
    }
}

impl MatchingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let registered_profiles = IntGauge::new(
            "mood_bridge_registered_profiles",
            "Rooms registered for ambient matching",
        )?;
        registry.register(Box::new(registered_profiles.clone()))?;

        let searches_total =
            IntCounter::new("mood_bridge_match_searches_total", "Total similarity searches")?;
        registry.register(Box::new(searches_total.clone()))?;

        let high_quality_matches_total = IntCounter::new(
            "mood_bridge_high_quality_matches_total",
            "Match-found notifications sent by the sweep",
        )?;
        registry.register(Box::new(high_quality_matches_total.clone()))?;

        let requests_total = IntCounterVec::new(
            Opts::new(
                "mood_bridge_connection_requests_total",
                "Connection requests by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let profiles_evicted_total = IntCounter::new(
            "mood_bridge_profiles_evicted_total",
            "Profiles evicted after the retention window",
        )?;
        registry.register(Box::new(profiles_evicted_total.clone()))?;

        Ok(Self {
            registered_profiles,
            searches_total,
            high_quality_matches_total,
            requests_total,
            profiles_evicted_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let fusion_duration = Histogram::with_opts(
            HistogramOpts::new("mood_bridge_fusion_duration_seconds", "Mood fusion time")
                .buckets(vec![0.00001, 0.0001, 0.001, 0.005, 0.01]),
        )?;
        registry.register(Box::new(fusion_duration.clone()))?;

        let match_search_duration = Histogram::with_opts(
            HistogramOpts::new(
                "mood_bridge_match_search_duration_seconds",
                "Similarity search time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(match_search_duration.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "mood_bridge_command_duration_seconds",
                "Room command handling time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "mood_bridge_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            fusion_duration,
            match_search_duration,
            command_duration,
            amqp_operation_duration,
        })
    }
}
