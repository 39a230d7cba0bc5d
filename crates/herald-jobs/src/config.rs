//! Scheduler configuration.

use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the scheduling system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Job store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Dispatcher (worker pool) configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Retry policy configuration.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Reaper configuration.
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl JobsConfig {
    /// Checks cross-field constraints.
    pub fn validate(&self) -> JobResult<()> {
        let d = &self.dispatcher;

        if d.concurrency == 0 {
            return Err(JobError::Configuration(
                "dispatcher.concurrency must be at least 1".to_string(),
            ));
        }
        if d.poll_interval_ms == 0 {
            return Err(JobError::Configuration(
                "dispatcher.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if d.batch_size == 0 {
            return Err(JobError::Configuration(
                "dispatcher.batch_size must be at least 1".to_string(),
            ));
        }
        if d.lease_duration() <= d.publish_timeout() {
            return Err(JobError::Configuration(format!(
                "dispatcher.lease_duration_secs ({}) must exceed publish_timeout_secs ({})",
                d.lease_duration_secs, d.publish_timeout_secs
            )));
        }
        if d.lease_renew_interval_secs == 0 || d.lease_renew_interval() >= d.lease_duration() {
            return Err(JobError::Configuration(format!(
                "dispatcher.lease_renew_interval_secs ({}) must be between 1 and lease_duration_secs ({})",
                d.lease_renew_interval_secs, d.lease_duration_secs
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(JobError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(JobError::Configuration(
                "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        if self.reaper.enabled {
            cron::Schedule::from_str(&self.reaper.cron).map_err(|e| {
                JobError::Configuration(format!(
                    "Invalid reaper cron expression '{}': {}",
                    self.reaper.cron, e
                ))
            })?;
        }

        Ok(())
    }
}

/// Which store implementation backs the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store. Jobs do not survive a restart.
    Memory,
    /// Redis store shared by every replica.
    #[default]
    Redis,
}

/// Job store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection settings (used when `backend = "redis"`).
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for all job-related keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "herald:jobs".to_string()
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum publishes in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Polling interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum due jobs fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Lease duration in seconds.
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    /// How often an in-flight publish renews its lease, in seconds.
    #[serde(default = "default_lease_renew_interval")]
    pub lease_renew_interval_secs: u64,

    /// Publish timeout in seconds.
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// Attempts for a bookkeeping write before leaving the job to lease expiry.
    #[serde(default = "default_store_retry_attempts")]
    pub store_retry_attempts: u32,

    /// Shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl DispatcherConfig {
    /// Polling interval, never shorter than 1ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renew_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
            lease_duration_secs: default_lease_duration(),
            lease_renew_interval_secs: default_lease_renew_interval(),
            publish_timeout_secs: default_publish_timeout(),
            store_retry_attempts: default_store_retry_attempts(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    500
}

fn default_batch_size() -> usize {
    32
}

fn default_lease_duration() -> u64 {
    120
}

fn default_lease_renew_interval() -> u64 {
    30
}

fn default_publish_timeout() -> u64 {
    90
}

fn default_store_retry_attempts() -> u32 {
    3
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt ceiling for new jobs.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    60_000 // 1 minute
}

fn default_max_delay() -> u64 {
    3_600_000 // 1 hour
}

/// Reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Run the periodic sweep.
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,

    /// Cron expression (with seconds) for the sweep.
    #[serde(default = "default_reaper_cron")]
    pub cron: String,

    /// How long terminal jobs are kept, in seconds.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl ReaperConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            cron: default_reaper_cron(),
            retention_secs: default_retention(),
        }
    }
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_cron() -> String {
    "0 0 0 * * *".to_string()
}

fn default_retention() -> u64 {
    86400 * 7 // 7 days
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = JobsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 60_000);
        assert_eq!(config.reaper.retention(), Duration::from_secs(604_800));
        assert_eq!(config.dispatcher.lease_duration(), Duration::from_secs(120));
    }

    #[test]
    fn test_lease_must_exceed_publish_timeout() {
        let mut config = JobsConfig::default();
        config.dispatcher.publish_timeout_secs = 120;
        assert!(matches!(config.validate(), Err(JobError::Configuration(_))));
    }

    #[test]
    fn test_renew_interval_must_be_shorter_than_lease() {
        let mut config = JobsConfig::default();
        config.dispatcher.lease_renew_interval_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected_and_clamped() {
        let mut config = JobsConfig::default();
        config.dispatcher.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(JobError::Configuration(_))));
        assert_eq!(config.dispatcher.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = JobsConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_cron_rejected_only_when_enabled() {
        let mut config = JobsConfig::default();
        config.reaper.cron = "every midnight".to_string();
        assert!(config.validate().is_err());

        config.reaper.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: JobsConfig = serde_json::from_str(
            r#"{"store":{"backend":"memory"},"retry":{"max_attempts":5}}"#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.redis.key_prefix, "herald:jobs");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 3_600_000);
        assert_eq!(config.dispatcher.concurrency, 4);
    }
}
