//! Registry of live workers, one per queue.
//!
//! Workers are created on first use and live until the registry is closed.
//! Creation is idempotent under races: concurrent first callers for a queue
//! share a single connection attempt, and a failed attempt leaves nothing
//! behind, so the next caller starts over.

use crate::error::{JobError, JobResult};
use crate::metrics::ConsumerMetrics;
use crate::queue::{QueueName, WorkerOptions};
use crate::worker::{BrokerConnector, Worker};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

type WorkerSlot = Arc<OnceCell<Arc<Worker>>>;

/// Worker registry.
pub struct WorkerRegistry {
    connector: Arc<dyn BrokerConnector>,
    slots: Mutex<HashMap<QueueName, WorkerSlot>>,
    creation_count: AtomicU64,
}

impl WorkerRegistry {
    /// Create an empty registry that opens sessions through `connector`.
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            slots: Mutex::new(HashMap::new()),
            creation_count: AtomicU64::new(0),
        }
    }

    /// Returns the worker for `queue`, creating it on first use.
    pub async fn ensure_worker(&self, queue: QueueName) -> JobResult<Arc<Worker>> {
        let slot = self.slots.lock().entry(queue).or_default().clone();

        let worker = slot.get_or_try_init(|| self.create_worker(queue)).await?;
        Ok(Arc::clone(worker))
    }

    async fn create_worker(&self, queue: QueueName) -> JobResult<Arc<Worker>> {
        let options = WorkerOptions::for_queue(queue);
        debug!(queue = %queue, "Creating worker");

        let session = self.connector.connect(queue, &options).await?;

        match Worker::start(queue, options, session.clone()).await {
            Ok(worker) => {
                let seq = self.creation_count.fetch_add(1, Ordering::Relaxed) + 1;
                ConsumerMetrics::worker_created(queue);
                info!(queue = %queue, creation_seq = seq, "Worker registered");
                Ok(Arc::new(worker))
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "Worker creation failed");
                if let Err(close_err) = session.close().await {
                    warn!(queue = %queue, error = %close_err, "Failed to close half-initialized session");
                }
                Err(e)
            }
        }
    }

    /// Returns the worker for `queue` if it has been created.
    pub fn get(&self, queue: QueueName) -> Option<Arc<Worker>> {
        self.slots
            .lock()
            .get(&queue)
            .and_then(|slot| slot.get().cloned())
    }

    /// All created workers.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.slots
            .lock()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    /// Number of created workers.
    pub fn len(&self) -> usize {
        self.workers().len()
    }

    /// Returns true if no worker has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful creations over the registry's lifetime.
    pub fn total_creations(&self) -> u64 {
        self.creation_count.load(Ordering::Relaxed)
    }

    /// Closes every worker concurrently and empties the registry.
    ///
    /// A worker still being created is waited for and closed as well. Every
    /// close is attempted; the result of each is returned.
    pub async fn close_all(&self) -> Vec<(QueueName, JobResult<()>)> {
        let slots: Vec<WorkerSlot> = self
            .slots
            .lock()
            .drain()
            .map(|(_, slot)| slot)
            .collect();

        let settled = join_all(slots.iter().map(|slot| {
            slot.get_or_try_init(|| async {
                Err::<Arc<Worker>, JobError>(JobError::Internal("registry closed".to_string()))
            })
        }))
        .await;
        let workers: Vec<Arc<Worker>> = settled
            .into_iter()
            .filter_map(|worker| worker.ok().cloned())
            .collect();

        join_all(workers.into_iter().map(|worker| async move {
            let result = worker.close().await;
            (worker.queue(), result)
        }))
        .await
    }
}
