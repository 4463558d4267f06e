//! Redis-backed broker session, poll lock, and rate limiter.

mod lock;
mod rate_limiter;
mod session;

pub use lock::{RedisLease, RedisLockService};
pub use rate_limiter::RedisRateLimiter;
pub use session::{RedisConnector, RedisSession, STALLED_FAILURE_REASON};

use crate::error::{JobError, JobResult};
use crate::queue::QueueName;
use conveyor_config::RedisConfig;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Build a Redis connection pool without touching the server.
pub fn build_pool(config: &RedisConfig) -> JobResult<Pool> {
    Config::from_url(&config.url)
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .create_timeout(Some(config.connect_timeout()))
        .wait_timeout(Some(config.connect_timeout()))
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))
}

/// Create a Redis connection pool and check it with a `PING`.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool...");

    let pool = build_pool(config)?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder.
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

    /// Common prefix of every key of `queue`, including the trailing colon.
    pub fn queue_prefix(&self, queue: QueueName) -> String {
        format!("{}:{}:", self.prefix, queue)
    }

    /// Waiting job ids (list).
    pub fn wait(&self, queue: QueueName) -> String {
        format!("{}wait", self.queue_prefix(queue))
    }

    /// Fetched job ids (list).
    pub fn active(&self, queue: QueueName) -> String {
        format!("{}active", self.queue_prefix(queue))
    }

    /// Completed job ids (sorted set by finish time).
    pub fn completed(&self, queue: QueueName) -> String {
        format!("{}completed", self.queue_prefix(queue))
    }

    /// Failed job ids (sorted set by finish time).
    pub fn failed(&self, queue: QueueName) -> String {
        format!("{}failed", self.queue_prefix(queue))
    }

    /// Ids marked by the last stalled check (set).
    pub fn stalled(&self, queue: QueueName) -> String {
        format!("{}stalled", self.queue_prefix(queue))
    }

    /// Common prefix of the job hashes of `queue`.
    ///
    /// Job keys live in their own namespace so an id can never collide with
    /// a structural key such as `wait` or `active`.
    pub fn job_prefix(&self, queue: QueueName) -> String {
        format!("{}job:", self.queue_prefix(queue))
    }

    /// Job hash.
    pub fn job(&self, queue: QueueName, job_id: &str) -> String {
        format!("{}{}", self.job_prefix(queue), job_id)
    }

    /// Job lock, holding the poll token.
    pub fn job_lock(&self, queue: QueueName, job_id: &str) -> String {
        format!("{}{}:lock", self.job_prefix(queue), job_id)
    }

    /// Named lease of the lock service.
    pub fn lease(&self, name: &str) -> String {
        format!("{}:lease:{}", self.prefix, name)
    }

    /// In-flight job ids of a project (set).
    pub fn project_in_flight(&self, project_id: &str) -> String {
        format!("{}:rate-limit:{}", self.prefix, project_id)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("conveyor")
    }
}
