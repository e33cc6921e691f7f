//! Main application state and service coordination
//!
//! `AppState` wires the room directory, matching engine, session manager,
//! broadcaster, command consumer, health server and background tasks into
//! one runnable service.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{CoreCommandHandler, RoomCommandConsumer};
use crate::amqp::local::LocalBroadcaster;
use crate::amqp::publisher::{AmqpEventBroadcaster, EventBroadcaster, PublisherConfig};
use crate::config::AppConfig;
use crate::directory::{InMemoryCatalog, InMemoryRoomDirectory, InMemorySnapshotStore};
use crate::matching::MatchingEngine;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthStatus};
use crate::service::supervisor::TaskSupervisor;
use crate::session::{DirectoryEngagement, SessionCollaborators, SessionManager};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Events buffered per room by the in-process broadcaster
const LOCAL_BROADCAST_CAPACITY: usize = 256;

/// Snapshots kept by the in-process persistence store
const SNAPSHOT_CAPACITY: usize = 10_000;

/// Interval of the uptime and health metrics task
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Where outbound events go
enum BroadcastBackend {
    Amqp(Arc<AmqpConnection>),
    Local(Arc<LocalBroadcaster>),
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    directory: Arc<InMemoryRoomDirectory>,
    snapshots: Arc<InMemorySnapshotStore>,
    catalog: Arc<InMemoryCatalog>,
    broadcaster: Arc<dyn EventBroadcaster>,
    backend: Mutex<Option<BroadcastBackend>>,
    matching: MatchingEngine,
    sessions: SessionManager,
    command_handler: Arc<CoreCommandHandler>,
    metrics_collector: Arc<MetricsCollector>,
    metrics_service: Mutex<Option<MetricsService>>,
    command_consumer: tokio::sync::Mutex<Option<RoomCommandConsumer>>,
    supervisor: TaskSupervisor,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies.
    ///
    /// Connects to the broker when AMQP is enabled, otherwise events go to an
    /// in-process broadcaster.
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} session orchestration service", config.service.name);

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (broadcaster, backend) =
            Self::initialize_broadcaster(&config, metrics_collector.clone()).await?;

        let directory = Arc::new(InMemoryRoomDirectory::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new(SNAPSHOT_CAPACITY));
        let catalog = Arc::new(InMemoryCatalog::new());

        let sessions = SessionManager::new(
            config.session.clone(),
            SessionCollaborators {
                directory: directory.clone(),
                snapshots: snapshots.clone(),
                catalog: catalog.clone(),
                engagement: Arc::new(DirectoryEngagement::new(directory.clone())),
                broadcaster: broadcaster.clone(),
            },
        )
        .with_metrics(metrics_collector.clone());

        let matching = MatchingEngine::new(
            config.matching.clone(),
            broadcaster.clone(),
            Arc::new(sessions.clone()),
        )
        .with_metrics(metrics_collector.clone());

        let command_handler = Arc::new(
            CoreCommandHandler::new(directory.clone(), matching.clone(), sessions.clone())
                .with_metrics(metrics_collector.clone()),
        );

        Ok(Self {
            config,
            directory,
            snapshots,
            catalog,
            broadcaster,
            backend: Mutex::new(Some(backend)),
            matching,
            sessions,
            command_handler,
            metrics_collector,
            metrics_service: Mutex::new(None),
            command_consumer: tokio::sync::Mutex::new(None),
            supervisor: TaskSupervisor::new(),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    async fn initialize_broadcaster(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<(Arc<dyn EventBroadcaster>, BroadcastBackend), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled, using the in-process broadcaster");
            let local = Arc::new(LocalBroadcaster::new(LOCAL_BROADCAST_CAPACITY));
            return Ok((local.clone(), BroadcastBackend::Local(local)));
        }

        info!("Connecting to AMQP broker: {}", config.amqp.url);
        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open publisher channel: {}", e),
                })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.event_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };
        let broadcaster = AmqpEventBroadcaster::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event broadcaster: {}", e),
            })?
            .with_metrics(metrics_collector);

        Ok((
            Arc::new(broadcaster),
            BroadcastBackend::Amqp(Arc::new(connection)),
        ))
    }

    /// Start the health server, command consumption and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} service", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_metrics_service()?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("✅ {} service started successfully", self.config.service.name);
        Ok(())
    }

    /// Stop everything in reverse start order
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP command consumption stopped");
            }
        }

        self.supervisor.shutdown().await;

        let cancelled_requests = self.matching.shutdown();
        let stopped_sessions = self
            .sessions
            .shutdown()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to stop session manager: {}", e),
            })?;
        info!(
            "Cancelled {} request timers and {} session tasks",
            cancelled_requests, stopped_sessions
        );

        let metrics_service = self
            .metrics_service
            .lock()
            .ok()
            .and_then(|mut service| service.take());
        if let Some(metrics_service) = metrics_service {
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            } else {
                info!("✅ Metrics service stopped");
            }
        }

        let backend = self.backend.lock().ok().and_then(|mut backend| backend.take());
        if let Some(BroadcastBackend::Amqp(connection)) = backend {
            match Arc::try_unwrap(connection) {
                Ok(connection) => {
                    if let Err(e) = connection.close().await {
                        warn!("Failed to close AMQP connection: {}", e);
                    }
                }
                Err(_) => warn!("AMQP connection still shared, leaving it to drop"),
            }
        }

        match (self.sessions.stats(), self.matching.stats()) {
            (Ok(sessions), Ok(matching)) => {
                info!("Final session statistics: {:?}", sessions);
                info!("Final matching statistics: {:?}", matching);
            }
            _ => warn!("Final statistics unavailable"),
        }
        info!("✅ {} shutdown completed", self.config.service.name);

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn directory(&self) -> Arc<InMemoryRoomDirectory> {
        self.directory.clone()
    }

    pub fn snapshots(&self) -> Arc<InMemorySnapshotStore> {
        self.snapshots.clone()
    }

    pub fn catalog(&self) -> Arc<InMemoryCatalog> {
        self.catalog.clone()
    }

    pub fn broadcaster(&self) -> Arc<dyn EventBroadcaster> {
        self.broadcaster.clone()
    }

    pub fn matching(&self) -> &MatchingEngine {
        &self.matching
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn command_handler(&self) -> Arc<CoreCommandHandler> {
        self.command_handler.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// The in-process broadcaster, when AMQP is disabled
    pub fn local_broadcaster(&self) -> Option<Arc<LocalBroadcaster>> {
        let backend = self.backend.lock().ok()?;
        match backend.as_ref()? {
            BroadcastBackend::Local(local) => Some(local.clone()),
            BroadcastBackend::Amqp(_) => None,
        }
    }

    /// Broker connection state, or `None` when AMQP is disabled
    pub fn amqp_connected(&self) -> Option<bool> {
        let backend = self.backend.lock().ok()?;
        match backend.as_ref()? {
            BroadcastBackend::Amqp(connection) => Some(connection.is_alive()),
            BroadcastBackend::Local(_) => None,
        }
    }

    pub fn background_tasks(&self) -> Vec<String> {
        self.supervisor.task_names()
    }

    fn start_metrics_service(self: &Arc<Self>) -> Result<(), ServiceError> {
        let health_config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        let metrics_service = MetricsService::new(self.metrics_collector.clone(), health_server);

        let server = metrics_service.clone();
        self.supervisor.spawn("health-server", async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            }
        });

        let mut slot = self
            .metrics_service
            .lock()
            .map_err(|_| ServiceError::Initialization {
                message: "Metrics service slot poisoned".to_string(),
            })?;
        *slot = Some(metrics_service);

        info!(
            "✅ Health endpoints starting on port {}",
            self.config.service.health_port
        );
        Ok(())
    }

    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let connection = {
            let backend = self
                .backend
                .lock()
                .map_err(|_| ServiceError::Initialization {
                    message: "Broadcast backend poisoned".to_string(),
                })?;
            match backend.as_ref() {
                Some(BroadcastBackend::Amqp(connection)) => connection.clone(),
                _ => {
                    info!("AMQP disabled, no command consumer started");
                    return Ok(());
                }
            }
        };

        let queue = self.config.amqp.command_queue.clone();
        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open consumer channel: {}", e),
                })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;
        info!("Queue '{}' declared", queue);

        let consumer = RoomCommandConsumer::new(self.command_handler.clone(), channel);
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming commands: {}", e),
            })?;

        *self.command_consumer.lock().await = Some(consumer);
        info!("Listening for room commands on '{}'", queue);
        Ok(())
    }

    fn start_background_tasks(self: &Arc<Self>) {
        let matching = self.matching.clone();
        self.supervisor.spawn_periodic(
            "match-sweep",
            self.config.matching.sweep_interval(),
            move || {
                let matching = matching.clone();
                async move {
                    if let Err(e) = matching.run_match_sweep().await {
                        error!("Match sweep failed: {}", e);
                    }
                }
            },
        );

        let matching = self.matching.clone();
        self.supervisor.spawn_periodic(
            "matching-expiry",
            self.config.matching.sweep_interval(),
            move || {
                let matching = matching.clone();
                async move {
                    if let Err(e) = matching.expire_profiles() {
                        error!("Profile expiry failed: {}", e);
                    }
                    if let Err(e) = matching.cleanup_requests() {
                        error!("Request cleanup failed: {}", e);
                    }
                }
            },
        );

        let sessions = self.sessions.clone();
        self.supervisor.spawn_periodic(
            "session-cleanup",
            self.config.session.cleanup_interval(),
            move || {
                let sessions = sessions.clone();
                async move {
                    match sessions.cleanup_retained() {
                        Ok((0, 0)) => debug!("Session cleanup found nothing to drop"),
                        Ok((ended, battles)) => {
                            info!("Dropped {} ended sessions and {} battles", ended, battles)
                        }
                        Err(e) => error!("Session cleanup failed: {}", e),
                    }
                }
            },
        );

        // Holds a weak handle so the task does not keep the state alive
        let state = Arc::downgrade(self);
        self.supervisor.spawn_periodic(
            "health-metrics",
            HEALTH_METRICS_INTERVAL,
            move || {
                let state = state.clone();
                async move {
                    if let Some(state) = state.upgrade() {
                        state.refresh_health_metrics().await;
                    }
                }
            },
        );

        info!(
            "Background tasks started: {}",
            self.supervisor.task_names().join(", ")
        );
    }

    async fn refresh_health_metrics(&self) {
        let metrics = &self.metrics_collector;
        metrics
            .service()
            .uptime_seconds
            .set(self.uptime().as_secs() as i64);

        match HealthCheck::check(self).await {
            Ok(health) => {
                metrics.update_health_status(match health.status {
                    HealthStatus::Healthy => 2,
                    HealthStatus::Degraded => 1,
                    HealthStatus::Unhealthy => 0,
                });
                for check in &health.checks {
                    metrics.update_component_health(
                        &check.name,
                        check.status != HealthStatus::Unhealthy,
                    );
                }
            }
            Err(e) => warn!("Health check for metrics failed: {}", e),
        }

        if let Some(local) = self.local_broadcaster() {
            let pruned = local.prune();
            if pruned > 0 {
                debug!("Pruned {} idle room channels", pruned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.amqp.enabled = false;
        config.service.health_port = 0;
        config
    }

    #[tokio::test]
    async fn test_local_backend_is_selected_without_amqp() {
        let state = AppState::new(local_config()).await.unwrap();
        assert!(state.local_broadcaster().is_some());
        assert_eq!(state.amqp_connected(), None);
        assert!(!state.is_running().await);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let state = Arc::new(AppState::new(local_config()).await.unwrap());
        state.start().await.unwrap();
        assert!(state.is_running().await);

        let tasks = state.background_tasks();
        for name in ["health-server", "match-sweep", "matching-expiry", "session-cleanup"] {
            assert!(tasks.iter().any(|task| task == name), "missing {}", name);
        }

        state.shutdown().await.unwrap();
        assert!(!state.is_running().await);
        assert!(state.background_tasks().is_empty());
    }
}
