//! Job consumer: polls queues and reports job outcomes.
//!
//! ```text
//! poll(queue, token)
//!   └─ lock "poll-<queue>" ── timeout ──▶ None
//!        └─ ensure worker ─▶ fetch_next(token) ─▶ release lock ─▶ job | None
//!
//! update(request)
//!   └─ ensure worker ─▶ resolve job ── missing/finished ──▶ Ok (no-op)
//!        └─ notify rate limiter (detached) ─▶ complete | fail
//! ```

use crate::error::{JobError, JobResult};
use crate::exception::{spawn_reported, ExceptionSink};
use crate::job::{JobId, JobStatus, PollToken, PolledJob, UpdateRequest};
use crate::lock::LockService;
use crate::metrics::{ConsumerMetrics, PollOutcome};
use crate::queue::QueueName;
use crate::rate_limiter::RateLimiter;
use crate::worker_registry::WorkerRegistry;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default wait for the per-queue poll lock.
pub const DEFAULT_POLL_LOCK_WAIT: Duration = Duration::from_millis(15_000);

/// Failure reason recorded when a failed update carries no message.
pub const DEFAULT_FAILURE_REASON: &str = "job failed without a reason";

/// Queue consumer facade.
pub struct JobConsumer {
    registry: Arc<WorkerRegistry>,
    locks: Arc<dyn LockService>,
    rate_limiter: Arc<dyn RateLimiter>,
    exceptions: Arc<dyn ExceptionSink>,
    poll_lock_wait: Duration,
}

impl JobConsumer {
    /// Create a consumer over an owned registry.
    pub fn new(
        registry: Arc<WorkerRegistry>,
        locks: Arc<dyn LockService>,
        rate_limiter: Arc<dyn RateLimiter>,
        exceptions: Arc<dyn ExceptionSink>,
    ) -> Self {
        Self {
            registry,
            locks,
            rate_limiter,
            exceptions,
            poll_lock_wait: DEFAULT_POLL_LOCK_WAIT,
        }
    }

    /// Override how long `poll` waits for the queue's lock.
    pub fn with_poll_lock_wait(mut self, wait: Duration) -> Self {
        self.poll_lock_wait = wait;
        self
    }

    /// The worker registry.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Fetches the next job of `queue`.
    ///
    /// Returns `Ok(None)` when the queue is empty or when another poll held
    /// the queue's lock for the whole wait. Other failures are reported to
    /// the exception sink and returned. The lock is released on every path;
    /// if the future is dropped mid-poll, the lease is dropped with it.
    pub async fn poll(&self, queue: QueueName, token: &PollToken) -> JobResult<Option<PolledJob>> {
        let lease = match self.locks.acquire(&queue.poll_lock_key(), self.poll_lock_wait).await {
            Ok(lease) => lease,
            Err(e) if e.is_timeout() => {
                debug!(queue = %queue, "Poll lock busy, no job this round");
                ConsumerMetrics::poll(queue, PollOutcome::Contended);
                return Ok(None);
            }
            Err(e) => {
                let err = JobError::from(e);
                self.exceptions.report(&err);
                ConsumerMetrics::poll(queue, PollOutcome::Error);
                return Err(err);
            }
        };

        let result = self.fetch_locked(queue, token).await;

        if let Err(e) = lease.release().await {
            warn!(queue = %queue, error = %e, "Failed to release poll lock");
            self.exceptions.report(&JobError::from(e));
        }

        match result {
            Ok(Some(job)) => {
                ConsumerMetrics::poll(queue, PollOutcome::Job);
                Ok(Some(job))
            }
            Ok(None) => {
                ConsumerMetrics::poll(queue, PollOutcome::Empty);
                Ok(None)
            }
            Err(e) => {
                self.exceptions.report(&e);
                ConsumerMetrics::poll(queue, PollOutcome::Error);
                Err(e)
            }
        }
    }

    async fn fetch_locked(&self, queue: QueueName, token: &PollToken) -> JobResult<Option<PolledJob>> {
        let worker = self.registry.ensure_worker(queue).await?;
        let job = worker.fetch_next(token).await?;
        Ok(job.map(PolledJob::from))
    }

    /// Applies a terminal status to a polled job.
    ///
    /// An update without a token fails immediately. An update for a job that
    /// is gone or already finished is logged and skipped. The rate limiter is
    /// notified before the transition, in a detached task whose failure only
    /// reaches the exception sink.
    pub async fn update(&self, request: UpdateRequest) -> JobResult<()> {
        let UpdateRequest {
            queue,
            job_id,
            status,
            message,
            token,
        } = request;

        let token = token.ok_or_else(|| JobError::MissingToken {
            job_id: job_id.to_string(),
        })?;

        let result = self
            .apply_update(queue, &job_id, status, message.as_deref(), &token)
            .await;

        if let Err(e) = &result {
            self.exceptions.report(e);
        }
        result
    }

    async fn apply_update(
        &self,
        queue: QueueName,
        job_id: &JobId,
        status: JobStatus,
        message: Option<&str>,
        token: &PollToken,
    ) -> JobResult<()> {
        let worker = self.registry.ensure_worker(queue).await?;

        let job = match worker.resolve(job_id).await? {
            Some(job) if !job.is_finished() => job,
            existing => {
                debug!(
                    queue = %queue,
                    job_id = %job_id,
                    status = %status,
                    finished = existing.is_some(),
                    "Job is missing or already finished, skipping update"
                );
                ConsumerMetrics::stale_update(queue);
                return Ok(());
            }
        };

        spawn_reported(
            self.exceptions.clone(),
            self.rate_limiter.on_complete_or_failed(queue, &job),
        );

        match status {
            JobStatus::Completed => worker.complete(&job, token).await?,
            JobStatus::Failed => {
                let reason = message.unwrap_or(DEFAULT_FAILURE_REASON);
                worker.fail(&job, token, reason).await?;
            }
        }

        ConsumerMetrics::update(queue, status);
        Ok(())
    }

    /// Creates a worker for every queue concurrently.
    ///
    /// Returns once every worker is ready; any failed creation fails the
    /// whole call.
    pub async fn init(&self) -> JobResult<()> {
        let results = join_all(
            QueueName::ALL
                .into_iter()
                .map(|queue| async move { (queue, self.registry.ensure_worker(queue).await) }),
        )
        .await;

        let mut first_error = None;
        for (queue, result) in results {
            if let Err(e) = result {
                error!(queue = %queue, error = %e, "Failed to initialize worker");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(queues = QueueName::ALL.len(), "All queue workers ready");
                Ok(())
            }
        }
    }

    /// Closes every worker concurrently.
    ///
    /// Every close is attempted; failures are reported and the first one is
    /// returned.
    pub async fn close(&self) -> JobResult<()> {
        let mut first_error = None;
        for (queue, result) in self.registry.close_all().await {
            if let Err(e) = result {
                warn!(queue = %queue, error = %e, "Failed to close worker");
                self.exceptions.report(&e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Job consumer closed");
                Ok(())
            }
        }
    }
}
