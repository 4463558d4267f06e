//! Dependency injection interfaces for the consumer.
//!
//! Provides a Shaku-compatible interface over [`JobConsumer`] and the wiring
//! that builds one from [`AppConfig`].

use crate::consumer::JobConsumer;
use crate::error::JobResult;
use crate::exception::TracingExceptionSink;
use crate::job::{PollToken, PolledJob, UpdateRequest};
use crate::lock::{LockService, MemoryLockService};
use crate::metrics::register_metrics;
use crate::queue::QueueName;
use crate::rate_limiter::{NoopRateLimiter, RateLimiter};
use crate::redis::{create_pool, RedisConnector, RedisKeys, RedisLockService, RedisRateLimiter};
use crate::worker_registry::WorkerRegistry;
use async_trait::async_trait;
use conveyor_config::{AppConfig, LockBackend};
use conveyor_core::Interface;
use std::sync::Arc;
use tracing::info;

/// Interface for queue consumer operations.
#[async_trait]
pub trait ConsumerManager: Interface + Send + Sync {
    /// Fetch the next job of a queue.
    async fn poll(&self, queue: QueueName, token: &PollToken) -> JobResult<Option<PolledJob>>;

    /// Report the terminal status of a polled job.
    async fn update(&self, request: UpdateRequest) -> JobResult<()>;

    /// Create every queue's worker.
    async fn init(&self) -> JobResult<()>;

    /// Close every worker.
    async fn close(&self) -> JobResult<()>;
}

#[async_trait]
impl ConsumerManager for JobConsumer {
    async fn poll(&self, queue: QueueName, token: &PollToken) -> JobResult<Option<PolledJob>> {
        JobConsumer::poll(self, queue, token).await
    }

    async fn update(&self, request: UpdateRequest) -> JobResult<()> {
        JobConsumer::update(self, request).await
    }

    async fn init(&self) -> JobResult<()> {
        JobConsumer::init(self).await
    }

    async fn close(&self) -> JobResult<()> {
        JobConsumer::close(self).await
    }
}

/// Build a Redis-backed consumer from configuration.
///
/// A shared pool is opened only when the Redis lock backend or the rate
/// limiter needs one. Workers are not created until `init` or first use.
pub async fn build_consumer(config: &AppConfig) -> JobResult<JobConsumer> {
    register_metrics();

    let keys = RedisKeys::new(&config.redis.key_prefix);
    let use_redis_lock = config.consumer.lock_backend == LockBackend::Redis;

    let shared_pool = if use_redis_lock || config.rate_limiter.enabled {
        Some(create_pool(&config.redis).await?)
    } else {
        None
    };

    let locks: Arc<dyn LockService> = match &shared_pool {
        Some(pool) if use_redis_lock => Arc::new(RedisLockService::new(
            pool.clone(),
            keys.clone(),
            config.consumer.lock_lease_ttl(),
        )),
        _ => Arc::new(MemoryLockService::new()),
    };

    let rate_limiter: Arc<dyn RateLimiter> = match &shared_pool {
        Some(pool) if config.rate_limiter.enabled => Arc::new(RedisRateLimiter::new(
            pool.clone(),
            keys,
            &config.rate_limiter,
        )?),
        _ => Arc::new(NoopRateLimiter),
    };

    let registry = Arc::new(WorkerRegistry::new(Arc::new(RedisConnector::new(
        config.redis.clone(),
    ))));

    info!(
        lock_backend = ?config.consumer.lock_backend,
        rate_limiter = config.rate_limiter.enabled,
        poll_lock_wait_ms = config.consumer.poll_lock_wait_ms,
        "Job consumer configured"
    );

    Ok(JobConsumer::new(
        registry,
        locks,
        rate_limiter,
        Arc::new(TracingExceptionSink),
    )
    .with_poll_lock_wait(config.consumer.poll_lock_wait()))
}
