//! State transition events.
//!
//! Every store write that changes a job's state emits one [`TransitionEvent`]
//! to the configured [`TransitionObserver`]. Observers run inline and must be
//! cheap; they cannot veto a transition.

use crate::job::{Job, JobState};
use crate::metrics::JobMetrics;
use chrono::{DateTime, Utc};
use herald_core::JobId;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// One state change of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionEvent {
    pub job_id: JobId,
    /// `None` when the job was just created.
    pub from: Option<JobState>,
    pub to: JobState,
    pub attempts: u32,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    /// Describes `job` having just moved from `from` into its current state.
    pub fn for_job(job: &Job, from: Option<JobState>, at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            from,
            to: job.state,
            attempts: job.attempts,
            error: job.last_error.clone(),
            at,
        }
    }
}

/// Consumer of transition events.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, event: &TransitionEvent);
}

/// Logs completions and failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TransitionObserver for TracingObserver {
    fn on_transition(&self, event: &TransitionEvent) {
        match event.to {
            JobState::Completed => {
                info!(job_id = %event.job_id, attempts = event.attempts, "Post published");
            }
            JobState::FailedRetryable => {
                warn!(
                    job_id = %event.job_id,
                    attempts = event.attempts,
                    error = event.error.as_deref().unwrap_or_default(),
                    "Post publish failed, will retry"
                );
            }
            JobState::Dead => {
                warn!(
                    job_id = %event.job_id,
                    attempts = event.attempts,
                    error = event.error.as_deref().unwrap_or_default(),
                    "Post publish failed permanently"
                );
            }
            JobState::Removed => {
                info!(job_id = %event.job_id, "Post cancelled");
            }
            JobState::Waiting | JobState::Active => {
                tracing::debug!(
                    job_id = %event.job_id,
                    from = ?event.from,
                    to = %event.to,
                    attempts = event.attempts,
                    "Job transition"
                );
            }
        }
    }
}

/// Feeds the transition counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl TransitionObserver for MetricsObserver {
    fn on_transition(&self, event: &TransitionEvent) {
        JobMetrics::transition(event.from, event.to);
    }
}

/// Fans events out to several observers in order.
#[derive(Clone, Default)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn TransitionObserver>>,
}

impl ObserverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logging plus metrics.
    pub fn standard() -> Self {
        Self::new().with(TracingObserver).with(MetricsObserver)
    }

    pub fn with(mut self, observer: impl TransitionObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    pub fn with_arc(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl TransitionObserver for ObserverChain {
    fn on_transition(&self, event: &TransitionEvent) {
        for observer in &self.observers {
            observer.on_transition(event);
        }
    }
}

/// Keeps every event in memory. Handy for auditing and tests.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<TransitionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.lock().clone()
    }

    /// The sequence of states one job went through.
    pub fn states_of(&self, job_id: &JobId) -> Vec<JobState> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.job_id == job_id)
            .map(|e| e.to)
            .collect()
    }
}

impl TransitionObserver for EventLog {
    fn on_transition(&self, event: &TransitionEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PostPayload;

    #[test]
    fn test_chain_fans_out() {
        let first = Arc::new(EventLog::new());
        let second = Arc::new(EventLog::new());
        let chain = ObserverChain::new()
            .with(TracingObserver)
            .with_arc(first.clone())
            .with_arc(second.clone());

        let now = Utc::now();
        let job = Job::new(PostPayload::text("hi"), now, 3, now);
        chain.on_transition(&TransitionEvent::for_job(&job, None, now));

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.states_of(&job.id), vec![JobState::Waiting]);
    }

    #[test]
    fn test_event_captures_job_fields() {
        let now = Utc::now();
        let mut job = Job::new(PostPayload::text("hi"), now, 3, now);
        job.attempts = 2;
        job.last_error = Some("boom".into());
        job.state = JobState::Dead;

        let event = TransitionEvent::for_job(&job, Some(JobState::Active), now);
        assert_eq!(event.from, Some(JobState::Active));
        assert_eq!(event.to, JobState::Dead);
        assert_eq!(event.attempts, 2);
        assert_eq!(event.error.as_deref(), Some("boom"));
    }
}
