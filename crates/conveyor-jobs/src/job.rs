//! Job handles, poll tokens, and status updates.

use crate::error::{JobError, JobResult};
use crate::queue::QueueName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque credential tying a poll to its later status update.
///
/// The broker stores it as the value of the job lock, so only the caller
/// holding the token of the dequeue can finish the job. Tokens are expected
/// to be unique per logical poll attempt.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollToken(String);

impl PollToken {
    /// Creates a new random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens act as lock values; keep them out of logs.
impl fmt::Debug for PollToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PollToken(..)")
    }
}

impl From<String> for PollToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PollToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A job as currently stored on the broker.
///
/// Never cached: every operation re-resolves it by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Queue the job belongs to.
    pub queue: QueueName,

    /// Job payload.
    pub data: Value,

    /// Failed attempts so far.
    pub attempts_made: u32,

    /// Times the job was recovered by the stalled check.
    pub stalled_counter: u32,

    /// Enqueue time, epoch milliseconds.
    pub timestamp: i64,

    /// Time of the last fetch, epoch milliseconds.
    pub processed_on: Option<i64>,

    /// Time the job reached a terminal state, epoch milliseconds.
    pub finished_on: Option<i64>,

    /// Failure reason, once failed.
    pub failed_reason: Option<String>,
}

impl Job {
    /// Builds a job from the fields of its broker hash.
    ///
    /// Returns `None` for an empty hash, which is how a missing job reads.
    pub fn from_fields(
        queue: QueueName,
        id: JobId,
        fields: &HashMap<String, String>,
    ) -> JobResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let data = match fields.get("data") {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Null,
        };

        Ok(Some(Self {
            id,
            queue,
            data,
            attempts_made: parse_field(fields, "attemptsMade")?.unwrap_or(0),
            stalled_counter: parse_field(fields, "stalledCounter")?.unwrap_or(0),
            timestamp: parse_field(fields, "timestamp")?.unwrap_or(0),
            processed_on: parse_field(fields, "processedOn")?,
            finished_on: parse_field(fields, "finishedOn")?,
            failed_reason: fields.get("failedReason").cloned(),
        }))
    }

    /// Returns true once the job is completed or failed.
    pub fn is_finished(&self) -> bool {
        self.finished_on.is_some()
    }

    /// Project that owns the job, if the payload names one.
    pub fn project_id(&self) -> Option<&str> {
        self.data.get("projectId").and_then(Value::as_str)
    }
}

fn parse_field<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
) -> JobResult<Option<T>> {
    match fields.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| JobError::Internal(format!("Invalid job field {}: {}", name, raw))),
    }
}

/// Result of a successful poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolledJob {
    /// Job ID.
    pub id: JobId,

    /// Job payload.
    pub data: Value,
}

impl From<Job> for PolledJob {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            data: job.data,
        }
    }
}

/// Terminal status reported by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job completed successfully.
    Completed,
    /// Job failed.
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status update for a previously polled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Queue the job was polled from.
    pub queue: QueueName,

    /// Job ID returned by the poll.
    pub job_id: JobId,

    /// Terminal status.
    pub status: JobStatus,

    /// Failure reason.
    #[serde(default)]
    pub message: Option<String>,

    /// Token the job was polled with. Required.
    #[serde(default)]
    pub token: Option<PollToken>,
}

impl UpdateRequest {
    /// Marks the job completed.
    pub fn completed(queue: QueueName, job_id: impl Into<JobId>, token: PollToken) -> Self {
        Self {
            queue,
            job_id: job_id.into(),
            status: JobStatus::Completed,
            message: None,
            token: Some(token),
        }
    }

    /// Marks the job failed with a reason.
    pub fn failed(
        queue: QueueName,
        job_id: impl Into<JobId>,
        token: PollToken,
        message: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            job_id: job_id.into(),
            status: JobStatus::Failed,
            message: Some(message.into()),
            token: Some(token),
        }
    }
}
