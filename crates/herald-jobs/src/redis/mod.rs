//! Redis-backed job store implementation.

mod store;

pub use store::RedisJobStore;

use crate::config::RedisConfig;
use crate::error::{JobError, JobResult};
use crate::job::JobState;
use deadpool_redis::{Config, Pool, Runtime};
use herald_core::JobId;
use tracing::info;

/// Create a Redis connection pool and verify it answers.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(url = %config.url, "Creating Redis connection pool for job store...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for the job store.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Job record key (JSON string).
    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Due index (sorted set: job_id scored by due time in ms).
    pub fn due(&self) -> String {
        format!("{}:due", self.prefix)
    }

    /// Per-state membership set.
    pub fn state(&self, state: JobState) -> String {
        format!("{}:state:{}", self.prefix, state.as_str())
    }

    /// Exclusive lease key (value: owner, TTL: lease duration).
    pub fn lease(&self, id: &JobId) -> String {
        format!("{}:lease:{}", self.prefix, id)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("herald:jobs")
    }
}
