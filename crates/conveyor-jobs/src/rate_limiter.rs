//! Downstream rate limiter notified of finished jobs.

use crate::error::JobResult;
use crate::job::Job;
use crate::queue::QueueName;
use futures::future::BoxFuture;

/// Receives a notification for every completed or failed job so it can
/// release whatever admission capacity the job held.
pub trait RateLimiter: Send + Sync {
    /// Builds the notification for `job`.
    ///
    /// The consumer spawns the returned future before it applies the status
    /// transition and never awaits it.
    fn on_complete_or_failed(&self, queue: QueueName, job: &Job) -> BoxFuture<'static, JobResult<()>>;
}

/// Rate limiter that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn on_complete_or_failed(&self, _queue: QueueName, _job: &Job) -> BoxFuture<'static, JobResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
