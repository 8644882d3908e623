//! Poller/Reconciler
//!
//! Background worker that re-reads every live execution on a fixed
//! interval and advances it through the same conditional steps a
//! synchronous driver uses. Passes are idempotent and may overlap with
//! each other and with drivers.

use crate::config::PollerConfig;
use crate::models::execution::{Execution, ExecutionStatus};
use crate::scheduler::{DriveMode, WaveScheduler};
use crate::store::ExecutionStore;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Statistics from one reconcile pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    /// Executions looked at
    pub examined: usize,
    /// Executions with at least one committed transition
    pub advanced: usize,
    pub waves_completed: usize,
    pub waves_failed: usize,
    /// Conditional writes lost to another writer and discarded
    pub conflicts: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

pub struct ExecutionPoller {
    scheduler: Arc<WaveScheduler>,
    store: Arc<dyn ExecutionStore>,
    config: PollerConfig,
    last_stats: Arc<RwLock<Option<ReconcileStats>>>,
}

impl ExecutionPoller {
    pub fn new(scheduler: Arc<WaveScheduler>, store: Arc<dyn ExecutionStore>, config: PollerConfig) -> Self {
        Self {
            scheduler,
            store,
            config,
            last_stats: Arc::new(RwLock::new(None)),
        }
    }

    /// One pass over RUNNING executions and PENDING ones left behind by their creator
    pub async fn reconcile_once(&self) -> ReconcileStats {
        let started = Instant::now();
        let mut stats = ReconcileStats::default();

        let candidates = match self.candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                stats.errors.push(format!("listing executions: {e}"));
                return stats;
            }
        };

        for execution in candidates {
            stats.examined += 1;
            let id = execution.id;
            match self.scheduler.drive_loaded(execution, DriveMode::Reconcile).await {
                Ok(report) => {
                    if report.transitions > 0 {
                        stats.advanced += 1;
                    }
                    stats.waves_completed += report.waves_completed;
                    stats.waves_failed += report.waves_failed;
                    stats.conflicts += report.conflicts;
                }
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "reconcile failed");
                    stats.errors.push(format!("{id}: {e}"));
                }
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        *self.last_stats.write() = Some(stats.clone());
        stats
    }

    async fn candidates(&self) -> crate::error::FailoverResult<Vec<Execution>> {
        let mut candidates = self.store.list_by_status(ExecutionStatus::Running).await?;
        let cutoff = Utc::now() - self.config.launch_grace();
        candidates.extend(
            self.store
                .list_by_status(ExecutionStatus::Pending)
                .await?
                .into_iter()
                .filter(|e| e.updated_at <= cutoff),
        );
        Ok(candidates)
    }

    pub fn last_stats(&self) -> Option<ReconcileStats> {
        self.last_stats.read().clone()
    }

    /// Spawn the background loop
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let interval = self.config.interval();

        let task = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "execution poller started");
            loop {
                let stats = self.reconcile_once().await;
                if stats.errors.is_empty() {
                    debug!(
                        examined = stats.examined,
                        advanced = stats.advanced,
                        conflicts = stats.conflicts,
                        "reconcile pass completed"
                    );
                } else {
                    warn!(errors = stats.errors.len(), "reconcile pass completed with errors");
                }

                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("execution poller stopping");
        });

        PollerHandle { shutdown, task }
    }
}

/// Handle for stopping the background poller
pub struct PollerHandle {
    shutdown: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl PollerHandle {
    /// Stop after the current pass and wait for the task to exit
    pub async fn stop(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!("Error waiting for execution poller to stop: {}", e);
        }
        info!("execution poller stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
