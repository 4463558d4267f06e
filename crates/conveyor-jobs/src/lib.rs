//! Conveyor Jobs - Queue Consumer Worker Manager
//!
//! Lets callers pull jobs from named broker queues one at a time and report
//! their outcome later:
//! - One lazily created worker per queue, shared by every caller
//! - Per-queue poll lock serializing fetches on the worker's connection
//! - Poll tokens tying a fetch to its later status update
//! - Downstream rate limiter notified of every finished job
//! - Process-wide exception sink for errors that must not be lost
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Conveyor Consumer Architecture                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Caller (HTTP handler, CLI, ...)                                 │
//! │     │  poll(queue, token)          update(request)               │
//! │     ▼                                                            │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    JobConsumer                           │    │
//! │  │  ┌─────────────┐  ┌──────────────┐  ┌───────────────┐   │    │
//! │  │  │ LockService │  │ RateLimiter  │  │ ExceptionSink │   │    │
//! │  │  │ poll-<queue>│  │  (detached)  │  │               │   │    │
//! │  │  └─────────────┘  └──────────────┘  └───────────────┘   │    │
//! │  └────────────────────────────┬────────────────────────────┘    │
//! │                               ▼                                  │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                  WorkerRegistry                          │    │
//! │  │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐ │    │
//! │  │  │ webhookJobs  │ │ oneTimeJobs  │ │ repeatableJobs   │ │    │
//! │  │  │   Worker     │ │   Worker     │ │   Worker         │ │    │
//! │  │  └──────┬───────┘ └──────┬───────┘ └────────┬─────────┘ │    │
//! │  └─────────┼────────────────┼──────────────────┼───────────┘    │
//! │            └────────────────┼──────────────────┘                │
//! │                             ▼                                    │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │   Redis: wait ─▶ active ─▶ completed | failed            │    │
//! │  │          stalled check: active (lock expired) ─▶ wait    │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conveyor_jobs::prelude::*;
//!
//! let consumer = conveyor_jobs::build_consumer(&config).await?;
//! consumer.init().await?;
//!
//! let token = PollToken::generate();
//! if let Some(job) = consumer.poll(QueueName::Webhook, &token).await? {
//!     // process job.data ...
//!     consumer
//!         .update(UpdateRequest::completed(QueueName::Webhook, job.id, token))
//!         .await?;
//! }
//!
//! consumer.close().await?;
//! ```

pub mod consumer;
pub mod di;
pub mod error;
pub mod exception;
pub mod job;
pub mod lock;
pub mod metrics;
pub mod queue;
pub mod rate_limiter;
pub mod redis;
pub mod worker;
pub mod worker_registry;

pub use consumer::{JobConsumer, DEFAULT_FAILURE_REASON, DEFAULT_POLL_LOCK_WAIT};
pub use di::{build_consumer, ConsumerManager};
pub use error::{JobError, JobResult};
pub use exception::{spawn_reported, ExceptionSink, TracingExceptionSink};
pub use job::{Job, JobId, JobStatus, PollToken, PolledJob, UpdateRequest};
pub use lock::{Lease, LockError, LockService, MemoryLockService};
pub use metrics::{register_metrics, ConsumerMetrics, PollOutcome};
pub use queue::{QueueName, WorkerOptions};
pub use rate_limiter::{NoopRateLimiter, RateLimiter};
pub use worker::{BrokerConnector, BrokerSession, Worker};
pub use worker_registry::WorkerRegistry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::consumer::JobConsumer;
    pub use crate::di::ConsumerManager;
    pub use crate::job::{JobStatus, PollToken, PolledJob, UpdateRequest};
    pub use crate::queue::QueueName;
    pub use crate::{JobError, JobId, JobResult};
}
