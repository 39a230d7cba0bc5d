//! Public entry point: schedule, cancel and inspect posts.

use crate::clock::Clock;
use crate::error::{JobError, JobResult};
use crate::events::{TransitionEvent, TransitionObserver};
use crate::job::{Job, JobState, PostPayload};
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use herald_core::JobId;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Accepts scheduling requests and owns the cancel rules.
///
/// This is the only way jobs enter the store.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn TransitionObserver>,
    max_attempts: u32,
    wake: Option<Arc<Notify>>,
}

impl Scheduler {
    /// Create a scheduler giving every new job `max_attempts` attempts.
    ///
    /// Fails with `Configuration` if `max_attempts` is zero.
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn TransitionObserver>,
        max_attempts: u32,
    ) -> JobResult<Self> {
        if max_attempts == 0 {
            return Err(JobError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store,
            clock,
            observer,
            max_attempts,
            wake: None,
        })
    }

    /// Signal `wake` after each successful schedule so a co-located
    /// dispatcher polls without waiting for its next tick.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Creates a `Waiting` job due at `scheduled_at`.
    ///
    /// Fails with `InvalidSchedule` unless `scheduled_at` is strictly after now.
    pub async fn schedule(&self, payload: PostPayload, scheduled_at: DateTime<Utc>) -> JobResult<Job> {
        let now = self.clock.now();
        if scheduled_at <= now {
            return Err(JobError::InvalidSchedule { scheduled_at, now });
        }

        let job = Job::new(payload, scheduled_at, self.max_attempts, now);
        self.store.create(job.clone()).await?;

        info!(
            job_id = %job.id,
            scheduled_at = %job.scheduled_at,
            max_attempts = job.max_attempts,
            "Post scheduled"
        );
        self.observer
            .on_transition(&TransitionEvent::for_job(&job, None, now));

        if let Some(wake) = &self.wake {
            wake.notify_one();
        }

        Ok(job)
    }

    /// Moves a `Waiting` or `FailedRetryable` job to `Removed` and deletes it.
    pub async fn cancel(&self, id: &JobId) -> JobResult<Job> {
        let now = self.clock.now();
        let previous = Mutex::new(None);

        let removed = self
            .store
            .update(id, &|job: &mut Job| {
                *previous.lock() = Some(job.state);
                job.cancel(now)
            })
            .await?;

        let from = *previous.lock();
        self.observer
            .on_transition(&TransitionEvent::for_job(&removed, from, now));

        if !self.store.delete(id).await? {
            debug!(job_id = %id, "Cancelled job already gone from store");
        }

        Ok(removed)
    }

    /// Read-only snapshot of jobs in any of `states`, earliest scheduled first.
    pub async fn list(&self, states: &[JobState]) -> JobResult<Vec<Job>> {
        let mut jobs = self.store.list_by_states(states).await?;
        jobs.sort_by_key(|job| (job.scheduled_at, job.id));
        Ok(jobs)
    }

    /// Fetches one job.
    pub async fn get(&self, id: &JobId) -> JobResult<Job> {
        self.store.get(id).await
    }

    /// Verifies the backing store is reachable.
    pub async fn health_check(&self) -> JobResult<()> {
        self.store.health_check().await
    }
}
