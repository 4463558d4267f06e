//! Application configuration structures.

use conveyor_core::TracingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Redis connection configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Queue consumer configuration.
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Downstream rate limiter configuration.
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: TracingConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "conveyor".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connections per worker pool. One is held by the blocking fetch.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all broker keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    /// Returns the connection timeout as a Duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    2
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "conveyor".to_string()
}

/// Backend used for the per-queue poll lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
    /// In-process lock; serializes polls within one process.
    #[default]
    Memory,
    /// Redis lease; serializes polls across processes.
    Redis,
}

/// Queue consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// How long `poll` waits for the per-queue lock before giving up.
    #[serde(default = "default_poll_lock_wait")]
    pub poll_lock_wait_ms: u64,

    /// Lock backend.
    #[serde(default)]
    pub lock_backend: LockBackend,

    /// Lease TTL for the Redis lock backend.
    #[serde(default = "default_lock_lease_ttl")]
    pub lock_lease_ttl_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_lock_wait_ms: default_poll_lock_wait(),
            lock_backend: LockBackend::default(),
            lock_lease_ttl_ms: default_lock_lease_ttl(),
        }
    }
}

impl ConsumerConfig {
    /// Returns the poll lock wait as a Duration.
    #[must_use]
    pub const fn poll_lock_wait(&self) -> Duration {
        Duration::from_millis(self.poll_lock_wait_ms)
    }

    /// Returns the Redis lease TTL as a Duration.
    #[must_use]
    pub const fn lock_lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ttl_ms)
    }
}

fn default_poll_lock_wait() -> u64 {
    15_000
}

fn default_lock_lease_ttl() -> u64 {
    30_000
}

/// Per-project concurrency limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Enable the limiter. When disabled, notifications are no-ops.
    #[serde(default)]
    pub enabled: bool,

    /// Maximum in-flight jobs per project.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs_per_project: u64,

    /// TTL of a project's in-flight set, refreshed on every admission.
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: u64,

    /// Broker queue names the limiter applies to.
    #[serde(default = "default_limited_queues")]
    pub limited_queues: Vec<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent_jobs_per_project: default_max_concurrent_jobs(),
            key_ttl_secs: default_key_ttl(),
            limited_queues: default_limited_queues(),
        }
    }
}

fn default_max_concurrent_jobs() -> u64 {
    100
}

fn default_key_ttl() -> u64 {
    600
}

fn default_limited_queues() -> Vec<String> {
    vec!["oneTimeJobs".to_string()]
}
