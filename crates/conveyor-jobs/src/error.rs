//! Job error types.

use crate::lock::LockError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Lock service error.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Broker session could not be established or is not ready.
    #[error("Connection error for queue {queue}: {message}")]
    Connection { queue: String, message: String },

    /// Job not found on the broker.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The job has no lock; it was reclaimed or never fetched.
    #[error("Missing lock for job {0}")]
    LockMissing(String),

    /// The job is locked by a different token.
    #[error("Lock mismatch for job {0}")]
    LockMismatch(String),

    /// Invalid job state.
    #[error("Invalid job state for {job_id}: expected {expected}")]
    InvalidState { job_id: String, expected: String },

    /// A status update was issued without the token the job was dequeued with.
    #[error("Token not found for job {job_id}")]
    MissingToken { job_id: String },

    /// Unknown queue name.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// Rate limiter failure.
    #[error("Rate limiter error: {0}")]
    RateLimiter(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Machine-readable error code, used as a metrics label.
    pub const fn code(&self) -> &'static str {
        match self {
            JobError::Serialization(_) => "serialization",
            JobError::Redis(_) => "redis",
            JobError::Pool(_) => "pool",
            JobError::Lock(_) => "lock",
            JobError::Connection { .. } => "connection",
            JobError::NotFound(_) => "not_found",
            JobError::LockMissing(_) => "lock_missing",
            JobError::LockMismatch(_) => "lock_mismatch",
            JobError::InvalidState { .. } => "invalid_state",
            JobError::MissingToken { .. } => "missing_token",
            JobError::UnknownQueue(_) => "unknown_queue",
            JobError::RateLimiter(_) => "rate_limiter",
            JobError::Configuration(_) => "configuration",
            JobError::Internal(_) => "internal",
        }
    }
}

impl From<conveyor_core::ConveyorError> for JobError {
    fn from(err: conveyor_core::ConveyorError) -> Self {
        match err {
            conveyor_core::ConveyorError::Configuration(msg) => JobError::Configuration(msg),
            conveyor_core::ConveyorError::Internal(msg) => JobError::Internal(msg),
        }
    }
}
