//! Configuration validation.
//!
//! Fails fast on invalid configuration rather than at the first poll.

use crate::{AppConfig, LockBackend};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Pool size must be at least 1.
    EmptyPool,
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
    /// Key prefix must not be empty.
    EmptyKeyPrefix,
    /// Rate limiter capacity must be positive when enabled.
    ZeroRateLimit,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::EmptyPool => write!(f, "Redis pool size must be at least 1"),
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout {} must be positive, got {}", name, value)
            }
            Self::EmptyKeyPrefix => write!(f, "Redis key prefix must not be empty"),
            Self::ZeroRateLimit => {
                write!(f, "max_concurrent_jobs_per_project must be positive when the rate limiter is enabled")
            }
        }
    }
}

/// Validates a loaded [`AppConfig`].
pub struct ConfigValidator;

impl ConfigValidator {
    /// Runs every check and returns all failures at once.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        match Url::parse(&config.redis.url) {
            Ok(url) if url.scheme() == "redis" || url.scheme() == "rediss" => {}
            Ok(url) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: e.to_string(),
            }),
        }

        if config.redis.pool_size == 0 {
            errors.push(ConfigValidationError::EmptyPool);
        }

        if config.redis.key_prefix.is_empty() {
            errors.push(ConfigValidationError::EmptyKeyPrefix);
        }

        if config.consumer.poll_lock_wait_ms == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "consumer.poll_lock_wait_ms".to_string(),
                value: 0,
            });
        }

        if config.consumer.lock_backend == LockBackend::Redis && config.consumer.lock_lease_ttl_ms == 0 {
            errors.push(ConfigValidationError::NonPositiveTimeout {
                name: "consumer.lock_lease_ttl_ms".to_string(),
                value: 0,
            });
        }

        if config.rate_limiter.enabled && config.rate_limiter.max_concurrent_jobs_per_project == 0 {
            errors.push(ConfigValidationError::ZeroRateLimit);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Joins validation errors into one message.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
