//! Job record, payload and state machine.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use herald_core::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data needed to publish a post. Opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    /// Post text.
    pub message: String,

    /// Optional image reference (URL or path understood by the publisher).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,

    /// Optional destination page; the publisher's default page otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_page_id: Option<String>,
}

impl PostPayload {
    /// Creates a text-only payload for the default page.
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            image_path: None,
            target_page_id: None,
        }
    }

    /// Attaches an image reference.
    pub fn with_image(mut self, image_path: impl Into<String>) -> Self {
        self.image_path = Some(image_path.into());
        self
    }

    /// Targets a specific page.
    pub fn with_target(mut self, page_id: impl Into<String>) -> Self {
        self.target_page_id = Some(page_id.into());
        self
    }
}

/// Job lifecycle state.
///
/// ```text
/// Waiting ──lease──▶ Active ──ok──▶ Completed
///    ▲                 │ ├─fail, attempts < max──▶ FailedRetryable ──backoff──▶ Waiting
///    └──lease expired──┘ └─fail, attempts == max─▶ Dead
/// Waiting | FailedRetryable ──cancel──▶ Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its scheduled time.
    Waiting,
    /// Leased by a worker and being published.
    Active,
    /// Published successfully.
    Completed,
    /// Last attempt failed; will return to `Waiting` once the backoff elapses.
    FailedRetryable,
    /// Exhausted all attempts.
    Dead,
    /// Cancelled before publication.
    Removed,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 6] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::FailedRetryable,
        JobState::Dead,
        JobState::Removed,
    ];

    /// States the reaper may delete.
    pub const TERMINAL: [JobState; 3] = [JobState::Completed, JobState::Dead, JobState::Removed];

    /// States still awaiting publication (what users see as "scheduled").
    pub const PENDING: [JobState; 2] = [JobState::Waiting, JobState::FailedRetryable];

    /// Returns true for `Completed`, `Dead` and `Removed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead | JobState::Removed)
    }

    /// Returns true if an explicit cancel may move this state to `Removed`.
    pub fn is_cancellable(self) -> bool {
        matches!(self, JobState::Waiting | JobState::FailedRetryable)
    }

    /// Stable lowercase name, also used as a storage key segment.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::FailedRetryable => "failed_retryable",
            JobState::Dead => "dead",
            JobState::Removed => "removed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| JobError::Configuration(format!("Unknown job state: {}", s)))
    }
}

/// A scheduled publish request and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique, never reused.
    pub id: JobId,

    /// What to publish.
    pub payload: PostPayload,

    /// Current due time. Set on schedule, advanced on every retry.
    pub scheduled_at: DateTime<Utc>,

    /// Lifecycle state.
    pub state: JobState,

    /// Attempts started so far.
    pub attempts: u32,

    /// Attempt ceiling.
    pub max_attempts: u32,

    /// Error from the most recent failed attempt; cleared on success.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when the job enters a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Worker currently holding the lease.
    pub lease_owner: Option<String>,

    /// When the current lease lapses.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a `Waiting` job.
    pub fn new(
        payload: PostPayload,
        scheduled_at: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            payload,
            scheduled_at,
            state: JobState::Waiting,
            attempts: 0,
            max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            lease_owner: None,
            lease_expires_at: None,
        }
    }

    /// The instant this job next becomes eligible for a worker: its lease
    /// expiry while `Active`, its scheduled time otherwise.
    pub fn due_at(&self) -> DateTime<Utc> {
        match (self.state, self.lease_expires_at) {
            (JobState::Active, Some(expires)) => expires,
            _ => self.scheduled_at,
        }
    }

    /// Returns true if `list_due` should hand this job to the dispatcher.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting | JobState::FailedRetryable => self.scheduled_at <= now,
            JobState::Active => self.lease_expired(now),
            _ => false,
        }
    }

    /// Returns true if the job is `Active` but its lease has lapsed.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lease_expires_at.map_or(true, |expires| expires <= now)
    }

    /// Returns true if `try_lease` may claim the job.
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => self.scheduled_at <= now,
            JobState::Active => self.lease_expired(now),
            _ => false,
        }
    }

    /// Returns true if `owner` holds an unexpired lease.
    pub fn is_leased_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active
            && self.lease_owner.as_deref() == Some(owner)
            && !self.lease_expired(now)
    }

    /// Timestamp the reaper measures retention from.
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .is_terminal()
            .then(|| self.completed_at.unwrap_or(self.updated_at))
    }

    /// Claims the lease. Leasing a `Waiting` job starts a new attempt;
    /// reclaiming an expired `Active` lease reruns the inconclusive one.
    pub(crate) fn acquire_lease(&mut self, owner: &str, lease: ChronoDuration, now: DateTime<Utc>) {
        if self.state == JobState::Waiting {
            self.attempts += 1;
        }
        self.state = JobState::Active;
        self.lease_owner = Some(owner.to_string());
        self.lease_expires_at = Some(now + lease);
        self.updated_at = now;
    }

    /// Extends the lease held by `owner`.
    pub fn renew_lease(&mut self, owner: &str, lease: ChronoDuration, now: DateTime<Utc>) -> JobResult<()> {
        self.ensure_owner(owner)?;
        self.lease_expires_at = Some(now + lease);
        self.updated_at = now;
        Ok(())
    }

    /// `Active → Completed`.
    pub fn complete(&mut self, owner: &str, now: DateTime<Utc>) -> JobResult<()> {
        self.ensure_owner(owner)?;
        self.state = JobState::Completed;
        self.last_error = None;
        self.completed_at = Some(now);
        self.release(now);
        Ok(())
    }

    /// `Active → FailedRetryable`, due again at `retry_at`.
    ///
    /// Rejected once every attempt is used; such a job can only die.
    pub fn fail_retryable(
        &mut self,
        owner: &str,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobResult<()> {
        self.ensure_owner(owner)?;
        if self.attempts >= self.max_attempts {
            return Err(JobError::Internal(format!(
                "job {} used all {} attempts",
                self.id, self.max_attempts
            )));
        }
        self.state = JobState::FailedRetryable;
        self.last_error = Some(error.into());
        self.scheduled_at = retry_at;
        self.release(now);
        Ok(())
    }

    /// `Active → Dead`.
    pub fn kill(&mut self, owner: &str, error: impl Into<String>, now: DateTime<Utc>) -> JobResult<()> {
        self.ensure_owner(owner)?;
        self.state = JobState::Dead;
        self.last_error = Some(error.into());
        self.completed_at = Some(now);
        self.release(now);
        Ok(())
    }

    /// `FailedRetryable → Waiting` once the backoff elapsed.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> JobResult<()> {
        if self.state != JobState::FailedRetryable || self.scheduled_at > now {
            return Err(JobError::LeaseConflict(self.id));
        }
        self.state = JobState::Waiting;
        self.updated_at = now;
        Ok(())
    }

    /// `Waiting | FailedRetryable → Removed`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> JobResult<()> {
        match self.state {
            JobState::Active => Err(JobError::CannotCancelActive(self.id)),
            state if state.is_terminal() => Err(JobError::AlreadyTerminal { id: self.id, state }),
            _ => {
                self.state = JobState::Removed;
                self.completed_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
        }
    }

    // An expired lease still counts while nobody else has claimed it.
    fn ensure_owner(&self, owner: &str) -> JobResult<()> {
        if self.state == JobState::Active && self.lease_owner.as_deref() == Some(owner) {
            Ok(())
        } else {
            Err(JobError::LeaseConflict(self.id))
        }
    }

    fn release(&mut self, now: DateTime<Utc>) {
        self.lease_owner = None;
        self.lease_expires_at = None;
        self.updated_at = now;
    }
}
