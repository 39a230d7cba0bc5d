//! Prometheus metrics for scheduler monitoring.

use crate::job::JobState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the scheduler.
pub mod names {
    /// Total jobs accepted by `schedule`.
    pub const JOBS_SCHEDULED_TOTAL: &str = "herald_jobs_scheduled_total";
    /// Total publish attempts started.
    pub const JOBS_STARTED_TOTAL: &str = "herald_jobs_started_total";
    /// Total jobs published successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "herald_jobs_completed_total";
    /// Total failed attempts that will be retried.
    pub const JOBS_RETRIED_TOTAL: &str = "herald_jobs_retried_total";
    /// Total jobs that exhausted their attempts.
    pub const JOBS_DEAD_TOTAL: &str = "herald_jobs_dead_total";
    /// Total jobs cancelled.
    pub const JOBS_CANCELLED_TOTAL: &str = "herald_jobs_cancelled_total";
    /// Total terminal jobs deleted by the reaper.
    pub const JOBS_REAPED_TOTAL: &str = "herald_jobs_reaped_total";
    /// Total lease races lost.
    pub const LEASE_CONFLICTS_TOTAL: &str = "herald_jobs_lease_conflicts_total";
    /// Total expired leases taken over.
    pub const LEASE_RECLAIMED_TOTAL: &str = "herald_jobs_lease_reclaimed_total";

    /// Publishes currently in flight.
    pub const JOBS_IN_FLIGHT: &str = "herald_jobs_in_flight";

    /// Publish call duration in seconds.
    pub const PUBLISH_DURATION_SECONDS: &str = "herald_publish_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        names::JOBS_SCHEDULED_TOTAL,
        "Total number of jobs scheduled"
    );
    describe_counter!(
        names::JOBS_STARTED_TOTAL,
        "Total number of publish attempts started"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs published successfully"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of failed attempts scheduled for retry"
    );
    describe_counter!(
        names::JOBS_DEAD_TOTAL,
        "Total number of jobs that exhausted their attempts"
    );
    describe_counter!(
        names::JOBS_CANCELLED_TOTAL,
        "Total number of jobs cancelled"
    );
    describe_counter!(
        names::JOBS_REAPED_TOTAL,
        "Total number of terminal jobs deleted by the reaper"
    );
    describe_counter!(
        names::LEASE_CONFLICTS_TOTAL,
        "Total number of lease races lost to another worker"
    );
    describe_counter!(
        names::LEASE_RECLAIMED_TOTAL,
        "Total number of expired leases taken over"
    );

    describe_gauge!(
        names::JOBS_IN_FLIGHT,
        "Current number of publishes in flight"
    );

    describe_histogram!(
        names::PUBLISH_DURATION_SECONDS,
        "Publish call duration in seconds"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a state transition.
    pub fn transition(from: Option<JobState>, to: JobState) {
        let name = match (from, to) {
            (None, JobState::Waiting) => names::JOBS_SCHEDULED_TOTAL,
            (Some(JobState::Active), JobState::Active) => names::LEASE_RECLAIMED_TOTAL,
            (_, JobState::Active) => names::JOBS_STARTED_TOTAL,
            (_, JobState::Completed) => names::JOBS_COMPLETED_TOTAL,
            (_, JobState::FailedRetryable) => names::JOBS_RETRIED_TOTAL,
            (_, JobState::Dead) => names::JOBS_DEAD_TOTAL,
            (_, JobState::Removed) => names::JOBS_CANCELLED_TOTAL,
            (Some(_), JobState::Waiting) => return,
        };
        counter!(name).increment(1);
    }

    /// Record a lost lease race.
    pub fn lease_conflict() {
        counter!(names::LEASE_CONFLICTS_TOTAL).increment(1);
    }

    /// Record jobs deleted by a sweep.
    pub fn reaped(count: u64) {
        counter!(names::JOBS_REAPED_TOTAL).increment(count);
    }

    /// Record a publish call.
    pub fn publish_duration(duration: Duration, outcome: &'static str) {
        histogram!(
            names::PUBLISH_DURATION_SECONDS,
            "outcome" => outcome
        )
        .record(duration.as_secs_f64());
    }

    /// Update the in-flight gauge.
    pub fn in_flight(count: u64) {
        gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
    }
}
