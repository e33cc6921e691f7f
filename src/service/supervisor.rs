//! Named background tasks with deterministic shutdown

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Owns every long-running task of the service.
///
/// Shutdown aborts each task and waits for it to finish, so nothing keeps
/// running once [`TaskSupervisor::shutdown`] returns.
#[derive(Debug, Default)]
pub struct TaskSupervisor {
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an already running future under `name`
    pub fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.track(name, handle);
    }

    /// Run `job` every `period`, starting one period from now. A slow run
    /// delays the next tick rather than bunching runs up.
    pub fn spawn_periodic<F, Fut>(&self, name: &str, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            debug!("Periodic task {} started ({:?})", task_name, period);
            loop {
                interval.tick().await;
                job().await;
            }
        });
        self.track(name, handle);
    }

    fn track(&self, name: &str, handle: JoinHandle<()>) {
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push((name.to_string(), handle)),
            Err(_) => {
                warn!("Task registry unavailable, aborting {}", name);
                handle.abort();
            }
        }
    }

    /// Names of the supervised tasks, in spawn order
    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort every task and wait for each to stop. Returns how many were
    /// stopped.
    pub async fn shutdown(&self) -> usize {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return 0,
        };

        let count = tasks.len();
        for (_, handle) in &tasks {
            handle.abort();
        }
        for (name, handle) in tasks {
            match handle.await {
                Ok(()) => debug!("Task {} had already finished", name),
                Err(e) if e.is_cancelled() => debug!("Task {} stopped", name),
                Err(e) => warn!("Task {} failed: {}", name, e),
            }
        }

        info!("Stopped {} background tasks", count);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_runs_each_period() {
        let supervisor = TaskSupervisor::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        supervisor.spawn_periodic("counter", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.task_names(), vec!["counter".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let supervisor = TaskSupervisor::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        supervisor.spawn_periodic("counter", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        supervisor.spawn("idle", std::future::pending());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(supervisor.shutdown().await, 2);
        assert!(supervisor.is_empty());

        let after_shutdown = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }
}
