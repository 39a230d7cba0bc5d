//! Configuration validation.
//!
//! Collects every problem in one pass so startup reports them together
//! instead of failing on the first.

use crate::{AppConfig, PublisherKind};
use herald_jobs::StoreBackend;
use thiserror::Error;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    /// Port number is invalid (must be 1-65535).
    #[error("Invalid port for {name}: {value} (must be 1-65535)")]
    InvalidPort { name: String, value: u16 },

    /// Pool size exceeds maximum allowed.
    #[error("Pool size {value} exceeds maximum allowed ({maximum})")]
    PoolSizeTooLarge { value: usize, maximum: usize },

    /// URL format is invalid.
    #[error("Invalid {url_type} URL: {message}")]
    InvalidUrl { url_type: String, message: String },

    /// Timeout value must be positive.
    #[error("Timeout '{name}' must be positive, got {value}")]
    NonPositiveTimeout { name: String, value: u64 },

    /// Sampling ratio must be between 0.0 and 1.0.
    #[error("Invalid sampling ratio: {value} (must be between 0.0 and 1.0)")]
    InvalidSamplingRatio { value: f64 },

    /// The Graph publisher needs a token.
    #[error("publisher.access_token is required when publisher.kind is graph")]
    MissingAccessToken,

    /// Scheduler settings are inconsistent.
    #[error("{0}")]
    Jobs(String),
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: usize = 1000;

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_server(config, &mut errors);
        Self::validate_jobs(config, &mut errors);
        Self::validate_publisher(config, &mut errors);
        Self::validate_observability(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.server.port == 0 {
            errors.push(ConfigValidationError::InvalidPort {
                name: "server.port".to_string(),
                value: 0,
            });
        }
        if config.server.request_timeout_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "server.request_timeout_secs".to_string(),
                value: 0,
            });
        }
    }

    fn validate_jobs(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        if let Err(e) = config.jobs.validate() {
            errors.push(ConfigValidationError::Jobs(e.to_string()));
        }

        if config.jobs.store.backend != StoreBackend::Redis {
            return;
        }

        let redis = &config.jobs.store.redis;
        if !redis.url.starts_with("redis://") && !redis.url.starts_with("rediss://") {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            });
        }
        if redis.pool_size > Self::MAX_POOL_SIZE {
            errors.push(ConfigValidationError::PoolSizeTooLarge {
                value: redis.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }
    }

    fn validate_publisher(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let publisher = &config.publisher;
        if publisher.kind != PublisherKind::Graph {
            return;
        }

        if let Err(e) = Url::parse(&publisher.base_url) {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "publisher.base_url".to_string(),
                message: e.to_string(),
            });
        }
        if publisher.access_token.as_deref().map_or(true, str::is_empty) {
            errors.push(ConfigValidationError::MissingAccessToken);
        }
        if publisher.timeout_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "publisher.timeout_secs".to_string(),
                value: 0,
            });
        }
    }

    fn validate_observability(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let tracing = &config.observability.tracing;

        if !(0.0..=1.0).contains(&tracing.sampling_ratio) {
            errors.push(ConfigValidationError::InvalidSamplingRatio {
                value: tracing.sampling_ratio,
            });
        }

        if let Some(ref endpoint) = tracing.otlp_endpoint {
            if Url::parse(endpoint).is_err() {
                errors.push(ConfigValidationError::InvalidUrl {
                    url_type: "otlp_endpoint".to_string(),
                    message: format!("Invalid URL format: {}", endpoint),
                });
            }
        }
    }
}
