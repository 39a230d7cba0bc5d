//! In-process job store.
//!
//! Every operation runs under one lock, which makes `try_lease` trivially
//! atomic. Useful for tests, single-node deployments and local development.

use crate::error::{JobError, JobResult};
use crate::job::{Job, JobState};
use crate::store::{chrono_duration, JobMutation, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_core::JobId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// `HashMap`-backed [`JobStore`].
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns true if no records are held.
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> JobResult<JobId> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(JobError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> JobResult<Job> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or(JobError::NotFound(*id))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<Job>> {
        let mut due: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();

        due.sort_by_key(Job::due_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn try_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> JobResult<bool> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;

        if !job.is_leasable(now) {
            debug!(job_id = %id, state = %job.state, "Job not leasable");
            return Ok(false);
        }

        job.acquire_lease(owner, chrono_duration(lease), now);
        Ok(true)
    }

    async fn renew_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> JobResult<bool> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        Ok(job.renew_lease(owner, chrono_duration(lease), now).is_ok())
    }

    async fn update(&self, id: &JobId, mutation: JobMutation<'_>) -> JobResult<Job> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;

        let mut updated = job.clone();
        mutation(&mut updated)?;
        *job = updated.clone();
        Ok(updated)
    }

    async fn list_by_states(&self, states: &[JobState]) -> JobResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|job| states.contains(&job.state))
            .cloned()
            .collect();

        jobs.sort_by_key(|job| (job.scheduled_at, job.id));
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> JobResult<bool> {
        Ok(self.jobs.write().remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PostPayload;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(30);

    fn job_due_in(now: DateTime<Utc>, secs: i64) -> Job {
        Job::new(PostPayload::text("post"), now + ChronoDuration::seconds(secs), 3, now)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let job = job_due_in(now, 10);
        let id = store.create(job.clone()).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap(), job);
        assert!(matches!(
            store.create(job).await,
            Err(JobError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get(&JobId::new()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_due_orders_oldest_first() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let later = job_due_in(now, -5);
        let earlier = job_due_in(now, -20);
        let future = job_due_in(now, 60);
        store.create(later.clone()).await.unwrap();
        store.create(earlier.clone()).await.unwrap();
        store.create(future).await.unwrap();

        let due = store.list_due(now, 10).await.unwrap();
        let ids: Vec<JobId> = due.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![earlier.id, later.id]);

        let limited = store.list_due(now, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, earlier.id);
    }

    #[tokio::test]
    async fn test_try_lease_only_once() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.create(job_due_in(now, -1)).await.unwrap();

        assert!(store.try_lease(&id, "w1", now, LEASE).await.unwrap());
        assert!(!store.try_lease(&id, "w2", now, LEASE).await.unwrap());

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.lease_owner.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_try_lease_rejects_future_job() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.create(job_due_in(now, 60)).await.unwrap();
        assert!(!store.try_lease(&id, "w1", now, LEASE).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_reclaimed() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.create(job_due_in(now, -1)).await.unwrap();
        assert!(store.try_lease(&id, "w1", now, LEASE).await.unwrap());

        let after_expiry = now + ChronoDuration::seconds(31);
        let due = store.list_due(after_expiry, 10).await.unwrap();
        assert_eq!(due.len(), 1);

        assert!(store.try_lease(&id, "w2", after_expiry, LEASE).await.unwrap());
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.lease_owner.as_deref(), Some("w2"));
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn test_concurrent_lease_is_exclusive() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let id = store.create(job_due_in(now, -1)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_lease(&id, &format!("w{}", i), now, LEASE)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_renew_lease_requires_owner() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.create(job_due_in(now, -1)).await.unwrap();
        store.try_lease(&id, "w1", now, LEASE).await.unwrap();

        let later = now + ChronoDuration::seconds(20);
        assert!(store.renew_lease(&id, "w1", later, LEASE).await.unwrap());
        assert!(!store.renew_lease(&id, "w2", later, LEASE).await.unwrap());

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.lease_expires_at, Some(later + ChronoDuration::seconds(30)));
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_record_untouched() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let id = store.create(job_due_in(now, -1)).await.unwrap();
        store.try_lease(&id, "w1", now, LEASE).await.unwrap();

        let result = store.update(&id, &|job: &mut Job| job.complete("w2", now)).await;
        assert!(matches!(result, Err(JobError::LeaseConflict(_))));
        assert_eq!(store.get(&id).await.unwrap().state, JobState::Active);

        let done = store
            .update(&id, &|job: &mut Job| job.complete("w1", now))
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_list_by_states_and_delete() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let a = store.create(job_due_in(now, 10)).await.unwrap();
        let b = store.create(job_due_in(now, -1)).await.unwrap();
        store.try_lease(&b, "w1", now, LEASE).await.unwrap();

        let waiting = store.list_by_states(&[JobState::Waiting]).await.unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].id, a);

        let both = store
            .list_by_states(&[JobState::Waiting, JobState::Active])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        assert!(store.delete(&a).await.unwrap());
        assert!(!store.delete(&a).await.unwrap());
        assert_eq!(store.len(), 1);
    }
}
