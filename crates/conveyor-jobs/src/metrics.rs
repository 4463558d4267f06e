//! Prometheus metrics for the queue consumer.

use crate::job::JobStatus;
use crate::queue::QueueName;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Metric names for the queue consumer.
pub mod names {
    /// Total polls, labelled by outcome.
    pub const POLLS_TOTAL: &str = "conveyor_polls_total";
    /// Total applied status updates, labelled by status.
    pub const UPDATES_TOTAL: &str = "conveyor_updates_total";
    /// Total updates skipped because the job was gone or already finished.
    pub const STALE_UPDATES_TOTAL: &str = "conveyor_stale_updates_total";
    /// Total workers created.
    pub const WORKERS_CREATED_TOTAL: &str = "conveyor_workers_created_total";
    /// Total errors reported to the exception sink.
    pub const EXCEPTIONS_TOTAL: &str = "conveyor_exceptions_total";
    /// Fetch duration in seconds.
    pub const FETCH_DURATION_SECONDS: &str = "conveyor_fetch_duration_seconds";
    /// Jobs recovered by the stalled check, labelled by action.
    pub const STALLED_JOBS_TOTAL: &str = "conveyor_stalled_jobs_total";
}

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A job was returned.
    Job,
    /// The queue was empty.
    Empty,
    /// The poll lock was not acquired in time.
    Contended,
    /// The poll failed.
    Error,
}

impl PollOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Job => "job",
            PollOutcome::Empty => "empty",
            PollOutcome::Contended => "contended",
            PollOutcome::Error => "error",
        }
    }
}

/// Register metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::POLLS_TOTAL, "Total number of polls by outcome");
    describe_counter!(
        names::UPDATES_TOTAL,
        "Total number of job status updates applied"
    );
    describe_counter!(
        names::STALE_UPDATES_TOTAL,
        "Total number of status updates for missing or finished jobs"
    );
    describe_counter!(
        names::WORKERS_CREATED_TOTAL,
        "Total number of queue workers created"
    );
    describe_counter!(
        names::EXCEPTIONS_TOTAL,
        "Total number of errors reported to the exception sink"
    );
    describe_histogram!(
        names::FETCH_DURATION_SECONDS,
        "Duration of a broker fetch in seconds"
    );
    describe_counter!(
        names::STALLED_JOBS_TOTAL,
        "Total number of stalled jobs recovered or failed"
    );
}

/// Consumer metrics recorder.
#[derive(Clone)]
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a poll.
    pub fn poll(queue: QueueName, outcome: PollOutcome) {
        counter!(
            names::POLLS_TOTAL,
            "queue" => queue.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    /// Record an applied status update.
    pub fn update(queue: QueueName, status: JobStatus) {
        counter!(
            names::UPDATES_TOTAL,
            "queue" => queue.as_str(),
            "status" => status.to_string()
        )
        .increment(1);
    }

    /// Record a skipped status update.
    pub fn stale_update(queue: QueueName) {
        counter!(names::STALE_UPDATES_TOTAL, "queue" => queue.as_str()).increment(1);
    }

    /// Record a worker creation.
    pub fn worker_created(queue: QueueName) {
        counter!(names::WORKERS_CREATED_TOTAL, "queue" => queue.as_str()).increment(1);
    }

    /// Record a reported error.
    pub fn exception(code: &'static str) {
        counter!(names::EXCEPTIONS_TOTAL, "code" => code).increment(1);
    }

    /// Record fetch duration.
    pub fn fetch_duration(queue: QueueName, duration: Duration) {
        histogram!(names::FETCH_DURATION_SECONDS, "queue" => queue.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record stalled jobs moved back to wait and failed.
    pub fn stalled(queue: QueueName, recovered: u64, failed: u64) {
        if recovered > 0 {
            counter!(
                names::STALLED_JOBS_TOTAL,
                "queue" => queue.as_str(),
                "action" => "recovered"
            )
            .increment(recovered);
        }
        if failed > 0 {
            counter!(
                names::STALLED_JOBS_TOTAL,
                "queue" => queue.as_str(),
                "action" => "failed"
            )
            .increment(failed);
        }
    }
}
