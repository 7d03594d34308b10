//! Background tasks for periodic traffic sync and fleet health checks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::ServiceError;
use crate::fleet::FleetOrchestrator;
use crate::logger::log;
use crate::reconcile::TrafficReconciliationService;
use crate::utils::format_bytes;

/// Background task configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// Interval between traffic sync passes
    pub sync_interval: Duration,
    /// Interval between fleet health checks
    pub health_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            health_interval: Duration::from_secs(600),
        }
    }
}

impl TaskConfig {
    pub fn new(sync_interval: Duration, health_interval: Duration) -> Self {
        Self {
            sync_interval,
            health_interval,
        }
    }
}

/// Background tasks manager
pub struct BackgroundTasks {
    config: TaskConfig,
    reconcile: Arc<TrafficReconciliationService>,
    fleet: Option<Arc<FleetOrchestrator>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle for spawned background tasks
pub struct BackgroundTasksHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasksHandle {
    /// Stop all background tasks and wait for them to complete
    pub async fn shutdown(self) {
        log::info!("Stopping background tasks...");
        let _ = self.shutdown_tx.send(true);

        for (i, handle) in self.handles.into_iter().enumerate() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {
                    log::debug!(task = i, "Background task stopped");
                }
                Ok(Err(e)) => {
                    log::warn!(task = i, error = %e, "Background task panicked");
                }
                Err(_) => {
                    log::warn!(task = i, "Background task shutdown timeout");
                }
            }
        }
        log::info!("Background tasks stopped");
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }
}

impl BackgroundTasks {
    /// `fleet` is optional; without it only the sync task runs
    pub fn new(
        config: TaskConfig,
        reconcile: Arc<TrafficReconciliationService>,
        fleet: Option<Arc<FleetOrchestrator>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            reconcile,
            fleet,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Start all background tasks and return a handle for shutdown
    pub fn start(self) -> BackgroundTasksHandle {
        let mut handles = vec![self.start_sync_task()];
        if let Some(fleet) = &self.fleet {
            handles.push(self.start_health_task(Arc::clone(fleet)));
        }

        log::info!(tasks = handles.len(), "Background tasks started");

        BackgroundTasksHandle {
            shutdown_tx: self.shutdown_tx,
            handles,
        }
    }

    fn start_sync_task(&self) -> JoinHandle<()> {
        let reconcile = Arc::clone(&self.reconcile);
        let interval_duration = self.config.sync_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut interval = interval(interval_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sync_once(&reconcile).await {
                            log::debug!(error = %e, "Sync tick skipped");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log::debug!("Sync task shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn start_health_task(&self, fleet: Arc<FleetOrchestrator>) -> JoinHandle<()> {
        let interval_duration = self.config.health_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            // Finish teardowns interrupted by a previous run
            match fleet.resume_teardowns().await {
                Ok(results) => {
                    for (server_id, result) in results {
                        if let Err(e) = result {
                            log::warn!(server_id = %server_id, error = %e, "Teardown still failing");
                        }
                    }
                }
                Err(e) => log::warn!(error = %e, "Failed to list pending teardowns"),
            }

            let mut interval = interval(interval_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match fleet.health_check_all().await {
                            Ok(results) => {
                                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                                log::info!(servers = results.len(), failed = failed, "Health checks done");
                            }
                            Err(e) => log::warn!(error = %e, "Failed to run health checks"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log::debug!("Health task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

/// One sync pass over every panel. Errors only when there were panels and
/// none of them synced.
pub async fn sync_once(reconcile: &TrafficReconciliationService) -> Result<(), ServiceError> {
    let results = reconcile.sync_all().await?;
    let attempted = results.len();
    let mut failed = 0;
    for (panel, result) in results {
        if result.is_err() {
            failed += 1;
        }
        if let Ok(report) = result {
            log::info!(
                panel = %panel,
                matched = report.matched,
                skipped = report.skipped,
                upload = %format_bytes(report.up),
                download = %format_bytes(report.down),
                "Panel synchronized"
            );
        }
    }
    if attempted > 0 && failed == attempted {
        return Err(ServiceError::AllPanelsFailed(attempted));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelPool;
    use crate::store::StateStore;

    #[test]
    fn test_task_config_default() {
        let config = TaskConfig::default();
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.health_interval, Duration::from_secs(600));
    }

    #[test]
    fn test_task_config_new() {
        let config = TaskConfig::new(Duration::from_secs(30), Duration::from_secs(45));
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.health_interval, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_without_fleet() {
        let store = Arc::new(StateStore::in_memory());
        let reconcile = Arc::new(TrafficReconciliationService::new(
            Arc::new(PanelPool::new()),
            store.clone(),
            store,
        ));
        let handle = BackgroundTasks::new(TaskConfig::default(), reconcile, None).start();
        assert_eq!(handle.task_count(), 1);
        handle.shutdown().await;
    }
}
