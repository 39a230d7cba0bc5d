//! Periodic deletion of old terminal jobs.

use crate::clock::Clock;
use crate::error::{JobError, JobResult};
use crate::job::JobState;
use crate::metrics::JobMetrics;
use crate::store::{chrono_duration, JobStore};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Deletes `Completed`, `Dead` and `Removed` jobs once they are older than
/// the retention window. Never touches a job that is still pending.
pub struct Reaper {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    cron: String,
    schedule: Schedule,
    retention: Duration,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("cron", &self.cron)
            .field("retention", &self.retention)
            .finish()
    }
}

impl Reaper {
    /// Create a reaper sweeping on `cron_expr` (with a seconds field).
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        cron_expr: &str,
        retention: Duration,
    ) -> JobResult<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| JobError::Configuration(format!("Invalid cron expression: {}", e)))?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            store,
            clock,
            cron: cron_expr.to_string(),
            schedule,
            retention,
            shutdown_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Next sweep strictly after `from`.
    pub fn next_run_from(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// Deletes terminal jobs whose terminal timestamp is older than
    /// `now - retention`. Returns how many were deleted.
    pub async fn sweep(&self, retention: Duration) -> JobResult<u64> {
        let cutoff = self.clock.now() - chrono_duration(retention);
        let candidates = self.store.list_by_states(&JobState::TERMINAL).await?;

        let mut deleted = 0u64;
        for job in candidates {
            let Some(terminal_at) = job.terminal_at() else {
                continue;
            };
            if terminal_at >= cutoff {
                continue;
            }

            if self.store.delete(&job.id).await? {
                debug!(job_id = %job.id, state = %job.state, %terminal_at, "Reaped job");
                deleted += 1;
            }
        }

        JobMetrics::reaped(deleted);
        info!(deleted, %cutoff, "Reaper sweep finished");

        Ok(deleted)
    }

    /// Sweeps on every cron tick until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Reaper already running".to_string()));
        }

        info!(
            cron = %self.cron,
            retention_secs = self.retention.as_secs(),
            "Starting reaper"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        while !*shutdown_rx.borrow() {
            let now = self.clock.now();
            let Some(next) = self.next_run_from(now) else {
                warn!("Reaper schedule has no upcoming runs");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next_run = %next, "Reaper sleeping until next sweep");

            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.sweep(self.retention).await {
                error!(error = %e, "Reaper sweep failed");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Reaper stopped");

        Ok(())
    }

    /// Signals the sweep loop to exit.
    pub fn stop(&self) {
        info!("Stopping reaper...");
        self.shutdown_tx.send_replace(true);
    }

    /// Check if the sweep loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
