//! Job error types.

use crate::job::JobState;
use crate::publisher::PublishError;
use chrono::{DateTime, Utc};
use herald_core::{HeraldError, JobId};
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Requested publication time is not in the future.
    #[error("Scheduled time {scheduled_at} must be after {now}")]
    InvalidSchedule {
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// A job with this ID already exists.
    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    /// Attempted to cancel a job while a worker is publishing it.
    #[error("Job {0} is being published and cannot be cancelled")]
    CannotCancelActive(JobId),

    /// The job already reached a terminal state.
    #[error("Job {id} is already {state}")]
    AlreadyTerminal { id: JobId, state: JobState },

    /// Another worker holds (or took over) the lease.
    #[error("Lease conflict on job {0}")]
    LeaseConflict(JobId),

    /// The publisher rejected or failed the attempt.
    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    /// Backing store unreachable or failing.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if the failed store operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::StoreUnavailable(_))
    }
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        JobError::StoreUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for JobError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        JobError::StoreUnavailable(err.to_string())
    }
}

impl From<JobError> for HeraldError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidSchedule { .. } => HeraldError::InvalidSchedule(err.to_string()),
            JobError::NotFound(id) => HeraldError::not_found("Job", id),
            JobError::AlreadyExists(_)
            | JobError::CannotCancelActive(_)
            | JobError::AlreadyTerminal { .. }
            | JobError::LeaseConflict(_) => HeraldError::Conflict(err.to_string()),
            JobError::StoreUnavailable(msg) => HeraldError::StoreUnavailable(msg),
            JobError::Publish(e) => HeraldError::ExternalService {
                service: "publisher".to_string(),
                message: e.to_string(),
            },
            JobError::Configuration(msg) => HeraldError::Configuration(msg),
            JobError::Serialization(e) => HeraldError::from(e),
            JobError::Internal(msg) => HeraldError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_transient() {
        assert!(JobError::StoreUnavailable("connection reset".into()).is_transient());
        assert!(!JobError::NotFound(JobId::new()).is_transient());
        assert!(!JobError::LeaseConflict(JobId::new()).is_transient());
        assert!(!JobError::Publish(PublishError::Transport("dns".into())).is_transient());
    }

    #[test]
    fn test_invalid_schedule_maps_to_bad_request() {
        let now = Utc::now();
        let err = JobError::InvalidSchedule {
            scheduled_at: now,
            now,
        };
        let herald: HeraldError = err.into();
        assert_eq!(herald.status_code(), 400);
        assert_eq!(herald.error_code(), "INVALID_SCHEDULE");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let id = JobId::new();
        let herald: HeraldError = JobError::NotFound(id).into();
        assert_eq!(herald.status_code(), 404);
        assert!(herald.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_cancel_conflicts_map_to_409() {
        let id = JobId::new();
        let active: HeraldError = JobError::CannotCancelActive(id).into();
        assert_eq!(active.status_code(), 409);

        let terminal: HeraldError = JobError::AlreadyTerminal {
            id,
            state: JobState::Completed,
        }
        .into();
        assert_eq!(terminal.status_code(), 409);
        assert!(terminal.to_string().contains("completed"));
    }

    #[test]
    fn test_store_unavailable_maps_to_503() {
        let herald: HeraldError = JobError::StoreUnavailable("refused".into()).into();
        assert_eq!(herald.status_code(), 503);
    }
}
