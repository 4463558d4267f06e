//! Per-project concurrency limiter on Redis.
//!
//! Each project owns a set of in-flight job ids. Admission adds to the set
//! while it is below capacity; a finished job is removed from it.

use super::RedisKeys;
use crate::error::{JobError, JobResult};
use crate::job::Job;
use crate::queue::QueueName;
use crate::rate_limiter::RateLimiter;
use conveyor_config::RateLimiterConfig;
use deadpool_redis::Pool;
use futures::future::BoxFuture;
use futures::FutureExt;
use redis::AsyncCommands;
use tracing::{debug, trace};

/// Admits a job unless its project is at capacity.
///
/// KEYS: project set. ARGV: job id, capacity, TTL seconds.
const ADMIT_SCRIPT: &str = r#"
    if redis.call("SISMEMBER", KEYS[1], ARGV[1]) == 1 then
        return 0
    end
    if redis.call("SCARD", KEYS[1]) >= tonumber(ARGV[2]) then
        return 1
    end
    redis.call("SADD", KEYS[1], ARGV[1])
    redis.call("EXPIRE", KEYS[1], ARGV[3])
    return 0
"#;

fn limiter_error<E: std::fmt::Display>(e: E) -> JobError {
    JobError::RateLimiter(e.to_string())
}

/// Redis rate limiter.
pub struct RedisRateLimiter {
    pool: Pool,
    keys: RedisKeys,
    enabled: bool,
    capacity: u64,
    key_ttl_secs: u64,
    limited_queues: Vec<QueueName>,
}

impl RedisRateLimiter {
    /// Create a limiter; fails on an unknown queue name in `limited_queues`.
    pub fn new(pool: Pool, keys: RedisKeys, config: &RateLimiterConfig) -> JobResult<Self> {
        let limited_queues = config
            .limited_queues
            .iter()
            .map(|name| name.parse::<QueueName>())
            .collect::<JobResult<Vec<_>>>()
            .map_err(|e| JobError::Configuration(format!("Invalid limited queue: {}", e)))?;

        Ok(Self {
            pool,
            keys,
            enabled: config.enabled,
            capacity: config.max_concurrent_jobs_per_project,
            key_ttl_secs: config.key_ttl_secs,
            limited_queues,
        })
    }

    /// Returns true if jobs of `queue` are counted against their project.
    pub fn is_limited(&self, queue: QueueName) -> bool {
        self.enabled && self.limited_queues.contains(&queue)
    }

    /// Returns true if the project is at capacity; otherwise admits the job.
    pub async fn should_be_limited(&self, project_id: &str, job_id: &str) -> JobResult<bool> {
        let mut conn = self.pool.get().await.map_err(limiter_error)?;

        let limited: i32 = redis::Script::new(ADMIT_SCRIPT)
            .key(self.keys.project_in_flight(project_id))
            .arg(job_id)
            .arg(self.capacity)
            .arg(self.key_ttl_secs)
            .invoke_async(&mut *conn)
            .await
            .map_err(limiter_error)?;

        if limited == 1 {
            debug!(project_id = %project_id, job_id = %job_id, "Project at capacity");
        }
        Ok(limited == 1)
    }
}

impl RateLimiter for RedisRateLimiter {
    fn on_complete_or_failed(&self, queue: QueueName, job: &Job) -> BoxFuture<'static, JobResult<()>> {
        let project_id = match job.project_id() {
            Some(project_id) if self.is_limited(queue) => project_id,
            _ => return futures::future::ready(Ok(())).boxed(),
        };

        let pool = self.pool.clone();
        let key = self.keys.project_in_flight(project_id);
        let job_id = job.id.to_string();

        async move {
            let mut conn = pool.get().await.map_err(limiter_error)?;
            let _: i64 = conn.srem(&key, &job_id).await.map_err(limiter_error)?;
            trace!(key = %key, job_id = %job_id, "Released rate limiter slot");
            Ok(())
        }
        .boxed()
    }
}
