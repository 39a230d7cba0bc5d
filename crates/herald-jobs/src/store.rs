//! Job store abstraction.

use crate::error::JobResult;
use crate::job::{Job, JobState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_core::JobId;
use std::time::Duration;

/// A state change applied to one job record.
///
/// Returning an error aborts the update and leaves the record untouched.
/// Stores may invoke the mutation more than once when they retry an
/// optimistic write, so it must not have side effects of its own.
pub type JobMutation<'a> = &'a (dyn Fn(&mut Job) -> JobResult<()> + Send + Sync);

/// Durable keyed storage for jobs.
///
/// `try_lease` is atomic across every caller sharing the store; at most one
/// caller observes `true` for a given job until that lease lapses. All other
/// operations are read-your-writes for a single caller.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job. Fails with `AlreadyExists` if the ID is taken.
    async fn create(&self, job: Job) -> JobResult<JobId>;

    /// Fetches a job. Fails with `NotFound` for unknown IDs.
    async fn get(&self, id: &JobId) -> JobResult<Job>;

    /// Jobs a worker may pick up at `now`, earliest due first: due
    /// `Waiting` and `FailedRetryable` jobs and `Active` jobs whose lease
    /// has lapsed.
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<Job>>;

    /// Claims the job for `owner` for `lease` if it is due `Waiting` or
    /// lease-expired `Active`.
    async fn try_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> JobResult<bool>;

    /// Extends a lease `owner` still holds. Returns false if it was lost.
    async fn renew_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> JobResult<bool>;

    /// Applies `mutation` atomically and returns the updated job.
    async fn update(&self, id: &JobId, mutation: JobMutation<'_>) -> JobResult<Job>;

    /// Every job currently in one of `states`.
    async fn list_by_states(&self, states: &[JobState]) -> JobResult<Vec<Job>>;

    /// Physically removes a job. Returns false if it did not exist.
    async fn delete(&self, id: &JobId) -> JobResult<bool>;

    /// Verifies the store is reachable.
    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}

pub(crate) fn chrono_duration(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}
