//! Retry policy for failed publishes.
//!
//! The policy is a pure function of the attempt counter and its own settings,
//! so the dispatcher can consult it without any shared state.

use crate::config::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry strategy enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Same delay after every failure.
    Fixed,
    /// Delay doubles after every failure.
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry strategy.
    pub strategy: RetryStrategy,

    /// Attempt ceiling given to newly scheduled jobs.
    pub max_attempts: u32,

    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,

    /// Optional cap on a single delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::exponential(config.max_attempts, Duration::from_millis(config.base_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }
}

impl RetryPolicy {
    /// Creates an uncapped exponential policy.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
            max_delay_ms: None,
        }
    }

    /// Creates a fixed delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            max_attempts,
            base_delay_ms: delay.as_millis() as u64,
            max_delay_ms: None,
        }
    }

    /// Caps every delay at `delay`.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Returns true if a job that has run `attempts` of its `max_attempts`
    /// may be attempted again.
    pub fn is_retryable(&self, attempts: u32, max_attempts: u32) -> bool {
        attempts < max_attempts
    }

    /// Delay before the next attempt after `attempts` attempts have run.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let delay = match self.strategy {
            RetryStrategy::Fixed => self.base_delay_ms,
            RetryStrategy::Exponential => {
                let exp = attempts.saturating_sub(1).min(63);
                self.base_delay_ms.saturating_mul(1u64 << exp)
            }
        };

        let capped = match self.max_delay_ms {
            Some(max) => delay.min(max),
            None => delay,
        };

        Duration::from_millis(capped)
    }
}
