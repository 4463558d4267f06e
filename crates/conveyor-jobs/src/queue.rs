//! Queue identifiers and the per-queue worker policy.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Extra invisibility granted on top of a queue's base window so a job that
/// is still running is not reclaimed by the stalled check.
const LOCK_RENEWAL_MARGIN_SECS: u64 = 60 * 3;

/// Stalls tolerated before a job is failed instead of returned to `wait`.
pub const MAX_STALLED_COUNT: u32 = 5;

/// Long-poll window of a blocking fetch on an empty queue.
pub const DRAIN_DELAY: Duration = Duration::from_millis(5);

/// Period of the stalled-job check.
pub const STALLED_INTERVAL: Duration = Duration::from_millis(30_000);

/// Logical queues consumed by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// Jobs triggered by incoming webhooks.
    #[serde(rename = "webhookJobs")]
    Webhook,
    /// One-off manual or API-triggered runs.
    #[serde(rename = "oneTimeJobs")]
    OneTime,
    /// Repeating (scheduled) runs.
    #[serde(rename = "repeatableJobs")]
    Scheduled,
}

impl QueueName {
    /// Every queue, in initialization order.
    pub const ALL: [QueueName; 3] = [QueueName::Webhook, QueueName::OneTime, QueueName::Scheduled];

    /// Name of the queue on the broker.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueName::Webhook => "webhookJobs",
            QueueName::OneTime => "oneTimeJobs",
            QueueName::Scheduled => "repeatableJobs",
        }
    }

    /// How long a fetched job stays invisible to the stalled check.
    ///
    /// One-time runs may execute for up to ten minutes, so they get a longer
    /// base window than webhook and scheduled runs.
    pub const fn lock_duration(&self) -> Duration {
        match self {
            QueueName::Webhook => visibility_window(60),
            QueueName::OneTime => visibility_window(600),
            QueueName::Scheduled => visibility_window(60),
        }
    }

    /// Name of the lock that serializes polls on this queue.
    pub fn poll_lock_key(&self) -> String {
        format!("poll-{}", self.as_str())
    }
}

const fn visibility_window(base_secs: u64) -> Duration {
    Duration::from_secs(base_secs + LOCK_RENEWAL_MARGIN_SECS)
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| JobError::UnknownQueue(s.to_string()))
    }
}

/// Tunables a worker is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Lock (visibility) duration of a fetched job.
    pub lock_duration: Duration,

    /// Period of the stalled-job check.
    pub stalled_interval: Duration,

    /// Stalls tolerated before the job is failed.
    pub max_stalled_count: u32,

    /// Long-poll window of a fetch on an empty queue.
    pub drain_delay: Duration,
}

impl WorkerOptions {
    /// Options for the given queue.
    pub fn for_queue(queue: QueueName) -> Self {
        Self {
            lock_duration: queue.lock_duration(),
            stalled_interval: STALLED_INTERVAL,
            max_stalled_count: MAX_STALLED_COUNT,
            drain_delay: DRAIN_DELAY,
        }
    }
}
