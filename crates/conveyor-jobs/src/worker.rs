//! Per-queue worker over a broker session.

use crate::error::JobResult;
use crate::job::{Job, JobId, PollToken};
use crate::metrics::ConsumerMetrics;
use crate::queue::{QueueName, WorkerOptions};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Connection-bound broker primitive for one queue.
///
/// `fetch_next` is not safe to call concurrently on the same session;
/// callers serialize it through the lock service.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Resolves once the underlying connection is usable.
    async fn wait_until_ready(&self) -> JobResult<()>;

    /// Starts the periodic stalled-job check.
    async fn start_stalled_check_timer(&self) -> JobResult<()>;

    /// Moves the next waiting job to active, locked with `token`.
    ///
    /// Waits up to the drain delay for a job; `None` means the queue is empty.
    async fn fetch_next(&self, token: &PollToken) -> JobResult<Option<Job>>;

    /// Looks a job up by id.
    async fn resolve_by_id(&self, id: &JobId) -> JobResult<Option<Job>>;

    /// Moves an active job locked by `token` to completed.
    async fn mark_completed(&self, job: &Job, token: &PollToken) -> JobResult<()>;

    /// Moves an active job locked by `token` to failed.
    async fn mark_failed(&self, job: &Job, token: &PollToken, reason: &str) -> JobResult<()>;

    /// Stops the stalled check and closes the connection.
    async fn close(&self) -> JobResult<()>;
}

/// Opens broker sessions.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Opens a session for `queue`. The session may not be ready yet.
    async fn connect(
        &self,
        queue: QueueName,
        options: &WorkerOptions,
    ) -> JobResult<Arc<dyn BrokerSession>>;
}

/// The single live session through which one queue's jobs are fetched and
/// transitioned.
pub struct Worker {
    queue: QueueName,
    options: WorkerOptions,
    session: Arc<dyn BrokerSession>,
}

impl Worker {
    /// Waits for the session to be ready and starts its stalled check.
    pub async fn start(
        queue: QueueName,
        options: WorkerOptions,
        session: Arc<dyn BrokerSession>,
    ) -> JobResult<Self> {
        session.wait_until_ready().await?;
        session.start_stalled_check_timer().await?;

        info!(
            queue = %queue,
            lock_duration_ms = options.lock_duration.as_millis() as u64,
            stalled_interval_ms = options.stalled_interval.as_millis() as u64,
            max_stalled_count = options.max_stalled_count,
            "Worker started"
        );

        Ok(Self {
            queue,
            options,
            session,
        })
    }

    /// Queue this worker consumes.
    pub fn queue(&self) -> QueueName {
        self.queue
    }

    /// Options the worker was created with.
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Fetches the next job.
    pub async fn fetch_next(&self, token: &PollToken) -> JobResult<Option<Job>> {
        let started = Instant::now();
        let job = self.session.fetch_next(token).await?;
        ConsumerMetrics::fetch_duration(self.queue, started.elapsed());

        if let Some(job) = &job {
            debug!(queue = %self.queue, job_id = %job.id, "Fetched job");
        }

        Ok(job)
    }

    /// Looks a job up by id.
    pub async fn resolve(&self, id: &JobId) -> JobResult<Option<Job>> {
        self.session.resolve_by_id(id).await
    }

    /// Marks the job completed with an empty result.
    pub async fn complete(&self, job: &Job, token: &PollToken) -> JobResult<()> {
        self.session.mark_completed(job, token).await?;
        debug!(queue = %self.queue, job_id = %job.id, "Job completed");
        Ok(())
    }

    /// Marks the job failed with `reason`.
    pub async fn fail(&self, job: &Job, token: &PollToken, reason: &str) -> JobResult<()> {
        self.session.mark_failed(job, token, reason).await?;
        debug!(queue = %self.queue, job_id = %job.id, reason = %reason, "Job failed");
        Ok(())
    }

    /// Closes the session.
    pub async fn close(&self) -> JobResult<()> {
        self.session.close().await?;
        info!(queue = %self.queue, "Worker closed");
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
