//! Redis job store implementation.
//!
//! Layout under the configured prefix:
//!
//! - `job:{id}`: the JSON record, the source of truth
//! - `due`: sorted set of pending and leased job IDs scored by due time (ms)
//! - `state:{state}`: one membership set per state
//! - `lease:{id}`: exclusive lease key holding the owner, expiring with the lease
//!
//! Record writes are optimistic `WATCH`/`MULTI` transactions, so the indexes
//! always move together with the record.

use super::RedisKeys;
use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobState};
use crate::store::{chrono_duration, JobMutation, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Connection, Pool};
use herald_core::JobId;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Transactions retried this many times under contention before giving up.
const MAX_TX_RETRIES: usize = 16;

const RELEASE_LEASE: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

const RENEW_LEASE: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("pexpire", KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

/// Redis-backed job store, shareable by any number of dispatcher replicas.
pub struct RedisJobStore {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisJobStore {
    /// Create a new Redis job store.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(&config.key_prefix),
        }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Queues the record and index writes for `after` onto `pipe`.
    fn stage_write(
        &self,
        pipe: &mut redis::Pipeline,
        before: Option<&Job>,
        after: &Job,
    ) -> JobResult<()> {
        let id = after.id.to_string();

        pipe.set(self.keys.job(&after.id), serde_json::to_string(after)?)
            .ignore();

        if let Some(before) = before {
            if before.state != after.state {
                pipe.srem(self.keys.state(before.state), &id).ignore();
            }
        }
        pipe.sadd(self.keys.state(after.state), &id).ignore();

        match after.state {
            JobState::Waiting | JobState::FailedRetryable | JobState::Active => {
                pipe.zadd(self.keys.due(), &id, after.due_at().timestamp_millis())
                    .ignore();
            }
            _ => {
                pipe.zrem(self.keys.due(), &id).ignore();
            }
        }

        if after.state != JobState::Active {
            pipe.del(self.keys.lease(&after.id)).ignore();
        }

        Ok(())
    }

    /// Read-modify-write of one record under `WATCH`.
    async fn transact(
        &self,
        conn: &mut Connection,
        id: &JobId,
        mutation: JobMutation<'_>,
    ) -> JobResult<Job> {
        let key = self.keys.job(id);

        for _ in 0..MAX_TX_RETRIES {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<()>(&mut **conn)
                .await?;

            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else {
                unwatch(conn).await?;
                return Err(JobError::NotFound(*id));
            };

            let before: Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(e) => {
                    unwatch(conn).await?;
                    return Err(e.into());
                }
            };

            let mut after = before.clone();
            if let Err(e) = mutation(&mut after) {
                unwatch(conn).await?;
                return Err(e);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            if let Err(e) = self.stage_write(&mut pipe, Some(&before), &after) {
                unwatch(conn).await?;
                return Err(e);
            }

            let committed: Option<()> = pipe.query_async(&mut **conn).await?;
            if committed.is_some() {
                return Ok(after);
            }

            debug!(job_id = %id, "Job record changed during transaction, retrying");
        }

        Err(JobError::StoreUnavailable(format!(
            "Too much contention updating job {}",
            id
        )))
    }

    async fn release_lease_key(&self, conn: &mut Connection, id: &JobId, owner: &str) -> JobResult<()> {
        let _: i32 = redis::Script::new(RELEASE_LEASE)
            .key(self.keys.lease(id))
            .arg(owner)
            .invoke_async(&mut **conn)
            .await?;
        Ok(())
    }

    /// Loads records for the given IDs, skipping any that vanished.
    async fn load_many(&self, conn: &mut Connection, ids: &[String]) -> JobResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut job_keys = Vec::with_capacity(ids.len());
        for raw in ids {
            match raw.parse::<JobId>() {
                Ok(id) => job_keys.push(self.keys.job(&id)),
                Err(e) => warn!(member = %raw, error = %e, "Skipping malformed job ID in index"),
            }
        }
        if job_keys.is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&job_keys)
            .query_async(&mut **conn)
            .await?;

        let mut jobs = Vec::with_capacity(records.len());
        for json in records.into_iter().flatten() {
            match serde_json::from_str::<Job>(&json) {
                Ok(job) => jobs.push(job),
                Err(e) => error!(error = %e, "Failed to deserialize job record"),
            }
        }

        Ok(jobs)
    }
}

async fn unwatch(conn: &mut Connection) -> JobResult<()> {
    redis::cmd("UNWATCH")
        .query_async::<()>(&mut **conn)
        .await?;
    Ok(())
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: Job) -> JobResult<JobId> {
        let mut conn = self.conn().await?;
        let key = self.keys.job(&job.id);

        for _ in 0..MAX_TX_RETRIES {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<()>(&mut *conn)
                .await?;

            let exists: bool = conn.exists(&key).await?;
            if exists {
                unwatch(&mut conn).await?;
                return Err(JobError::AlreadyExists(job.id));
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            if let Err(e) = self.stage_write(&mut pipe, None, &job) {
                unwatch(&mut conn).await?;
                return Err(e);
            }

            let committed: Option<()> = pipe.query_async(&mut *conn).await?;
            if committed.is_some() {
                debug!(job_id = %job.id, scheduled_at = %job.scheduled_at, "Stored job");
                return Ok(job.id);
            }
        }

        Err(JobError::StoreUnavailable(format!(
            "Too much contention creating job {}",
            job.id
        )))
    }

    async fn get(&self, id: &JobId) -> JobResult<Job> {
        let mut conn = self.conn().await?;
        let json: Option<String> = conn.get(self.keys.job(id)).await?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(JobError::NotFound(*id)),
        }
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> JobResult<Vec<Job>> {
        let mut conn = self.conn().await?;

        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                self.keys.due(),
                "-inf",
                now.timestamp_millis(),
                0,
                limit as isize,
            )
            .await?;

        let mut jobs = self.load_many(&mut conn, &ids).await?;
        jobs.retain(|job| job.is_due(now));
        jobs.sort_by_key(Job::due_at);
        Ok(jobs)
    }

    async fn try_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let lease_key = self.keys.lease(id);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lease_key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut *conn)
            .await?;

        if acquired.is_none() {
            debug!(job_id = %id, "Lease key held by another worker");
            return Ok(false);
        }

        let lease_len = chrono_duration(lease);
        let result = self
            .transact(&mut conn, id, &|job: &mut Job| {
                if !job.is_leasable(now) {
                    return Err(JobError::LeaseConflict(job.id));
                }
                job.acquire_lease(owner, lease_len, now);
                Ok(())
            })
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(JobError::LeaseConflict(_)) => {
                self.release_lease_key(&mut conn, id, owner).await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(release_err) = self.release_lease_key(&mut conn, id, owner).await {
                    warn!(job_id = %id, error = %release_err, "Failed to release lease key");
                }
                Err(e)
            }
        }
    }

    async fn renew_lease(
        &self,
        id: &JobId,
        owner: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> JobResult<bool> {
        let mut conn = self.conn().await?;

        let renewed: i32 = redis::Script::new(RENEW_LEASE)
            .key(self.keys.lease(id))
            .arg(owner)
            .arg(lease.as_millis() as u64)
            .invoke_async(&mut *conn)
            .await?;

        if renewed == 0 {
            return Ok(false);
        }

        let lease_len = chrono_duration(lease);
        match self
            .transact(&mut conn, id, &|job: &mut Job| {
                job.renew_lease(owner, lease_len, now)
            })
            .await
        {
            Ok(_) => Ok(true),
            Err(JobError::LeaseConflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, id: &JobId, mutation: JobMutation<'_>) -> JobResult<Job> {
        let mut conn = self.conn().await?;
        self.transact(&mut conn, id, mutation).await
    }

    async fn list_by_states(&self, states: &[JobState]) -> JobResult<Vec<Job>> {
        let mut conn = self.conn().await?;

        let mut ids: Vec<String> = Vec::new();
        for state in states {
            let members: Vec<String> = conn.smembers(self.keys.state(*state)).await?;
            ids.extend(members);
        }

        let mut jobs = self.load_many(&mut conn, &ids).await?;
        // Index membership can trail a concurrent write; the record decides.
        jobs.retain(|job| states.contains(&job.state));
        jobs.sort_by_key(|job| (job.scheduled_at, job.id));
        jobs.dedup_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let member = id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.keys.job(id))
            .zrem(self.keys.due(), &member)
            .ignore()
            .del(self.keys.lease(id))
            .ignore();
        for state in JobState::ALL {
            pipe.srem(self.keys.state(state), &member).ignore();
        }

        let (removed,): (u32,) = pipe.query_async(&mut *conn).await?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await?;
        Ok(())
    }
}
