//! Common test infrastructure for consumer integration tests.
//!
//! An in-memory broker stands in for Redis. Every session, the rate limiter
//! and the exception sink write to one event log, so tests can assert on the
//! order in which things happened.
//!
//! `container` starts a real Redis for the broker integration tests.

#![allow(dead_code)]

pub mod container;

use async_trait::async_trait;
use conveyor_jobs::{
    BrokerConnector, BrokerSession, ExceptionSink, Job, JobConsumer, JobError, JobId, JobResult,
    Lease, LockError, LockService, MemoryLockService, PollToken, QueueName, RateLimiter,
    WorkerOptions, WorkerRegistry,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory broker shared by every mock session.
#[derive(Default)]
pub struct MockBroker {
    jobs: Mutex<HashMap<String, Job>>,
    waiting: Mutex<HashMap<QueueName, VecDeque<String>>>,
    locks: Mutex<HashMap<String, PollToken>>,
    events: Mutex<Vec<String>>,
    in_flight_fetches: AtomicUsize,
    max_in_flight_fetches: AtomicUsize,
    fetch_delay: Duration,
}

impl MockBroker {
    pub fn new(fetch_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetch_delay,
            ..Default::default()
        })
    }

    /// Enqueues a job at the back of `queue`.
    pub fn push(&self, queue: QueueName, id: &str, data: Value) {
        self.jobs.lock().insert(
            id.to_string(),
            Job {
                id: JobId::from(id),
                queue,
                data,
                attempts_made: 0,
                stalled_counter: 0,
                timestamp: 1_700_000_000_000,
                processed_on: None,
                finished_on: None,
                failed_reason: None,
            },
        );
        self.waiting
            .lock()
            .entry(queue)
            .or_default()
            .push_back(id.to_string());
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.jobs.lock().get(id).cloned()
    }

    pub fn lock_of(&self, id: &str) -> Option<PollToken> {
        self.locks.lock().get(id).cloned()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn max_in_flight_fetches(&self) -> usize {
        self.max_in_flight_fetches.load(Ordering::SeqCst)
    }

    fn finish(&self, job: &Job, token: &PollToken) -> JobResult<()> {
        let id = job.id.as_str();
        match self.locks.lock().get(id) {
            None => return Err(JobError::LockMissing(id.to_string())),
            Some(held) if held != token => return Err(JobError::LockMismatch(id.to_string())),
            Some(_) => {}
        }
        self.locks.lock().remove(id);
        Ok(())
    }
}

/// Session over the mock broker for one queue.
pub struct MockSession {
    queue: QueueName,
    broker: Arc<MockBroker>,
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn wait_until_ready(&self) -> JobResult<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(())
    }

    async fn start_stalled_check_timer(&self) -> JobResult<()> {
        Ok(())
    }

    async fn fetch_next(&self, token: &PollToken) -> JobResult<Option<Job>> {
        let broker = &self.broker;
        let now = broker.in_flight_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        broker.max_in_flight_fetches.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(broker.fetch_delay).await;

        let next = broker
            .waiting
            .lock()
            .get_mut(&self.queue)
            .and_then(VecDeque::pop_front);
        let job = next.and_then(|id| {
            broker.locks.lock().insert(id.clone(), token.clone());
            let mut jobs = broker.jobs.lock();
            let job = jobs.get_mut(&id)?;
            job.processed_on = Some(1_700_000_001_000);
            Some(job.clone())
        });

        broker.in_flight_fetches.fetch_sub(1, Ordering::SeqCst);
        Ok(job)
    }

    async fn resolve_by_id(&self, id: &JobId) -> JobResult<Option<Job>> {
        Ok(self.broker.job(id.as_str()))
    }

    async fn mark_completed(&self, job: &Job, token: &PollToken) -> JobResult<()> {
        self.broker.finish(job, token)?;
        if let Some(stored) = self.broker.jobs.lock().get_mut(job.id.as_str()) {
            stored.finished_on = Some(1_700_000_002_000);
        }
        self.broker.record(format!("complete:{}", job.id));
        Ok(())
    }

    async fn mark_failed(&self, job: &Job, token: &PollToken, reason: &str) -> JobResult<()> {
        self.broker.finish(job, token)?;
        if let Some(stored) = self.broker.jobs.lock().get_mut(job.id.as_str()) {
            stored.finished_on = Some(1_700_000_002_000);
            stored.failed_reason = Some(reason.to_string());
            stored.attempts_made += 1;
        }
        self.broker.record(format!("fail:{}:{}", job.id, reason));
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        self.broker.record(format!("close:{}", self.queue));
        Ok(())
    }
}

/// Connector that counts connections per queue and can refuse one queue.
pub struct MockConnector {
    broker: Arc<MockBroker>,
    connects: Mutex<HashMap<QueueName, usize>>,
    refused: Option<QueueName>,
}

impl MockConnector {
    pub fn new(broker: Arc<MockBroker>, refused: Option<QueueName>) -> Self {
        Self {
            broker,
            connects: Mutex::new(HashMap::new()),
            refused,
        }
    }

    pub fn connects(&self, queue: QueueName) -> usize {
        self.connects.lock().get(&queue).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.connects.lock().values().sum()
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(
        &self,
        queue: QueueName,
        _options: &WorkerOptions,
    ) -> JobResult<Arc<dyn BrokerSession>> {
        *self.connects.lock().entry(queue).or_default() += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;

        if self.refused == Some(queue) {
            return Err(JobError::Connection {
                queue: queue.to_string(),
                message: "connection refused".to_string(),
            });
        }

        Ok(Arc::new(MockSession {
            queue,
            broker: self.broker.clone(),
        }))
    }
}

/// Rate limiter that logs the notification when it is built.
pub struct RecordingRateLimiter {
    broker: Arc<MockBroker>,
    reject: bool,
}

impl RateLimiter for RecordingRateLimiter {
    fn on_complete_or_failed(&self, _queue: QueueName, job: &Job) -> BoxFuture<'static, JobResult<()>> {
        self.broker.record(format!("ratelimit:{}", job.id));
        let reject = self.reject;
        async move {
            if reject {
                Err(JobError::RateLimiter("rejected".to_string()))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

/// Exception sink that keeps the codes of reported errors.
#[derive(Default)]
pub struct CollectingSink {
    codes: Mutex<Vec<&'static str>>,
}

impl CollectingSink {
    pub fn codes(&self) -> Vec<&'static str> {
        self.codes.lock().clone()
    }

    /// Waits until at least `count` errors were reported.
    pub async fn wait_for(&self, count: usize) -> Vec<&'static str> {
        for _ in 0..100 {
            if self.codes.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.codes()
    }
}

impl ExceptionSink for CollectingSink {
    fn report(&self, error: &JobError) {
        self.codes.lock().push(error.code());
    }
}

/// Lock service whose backend is always down.
pub struct BrokenLockService;

#[async_trait]
impl LockService for BrokenLockService {
    async fn acquire(&self, _key: &str, _wait: Duration) -> Result<Box<dyn Lease>, LockError> {
        Err(LockError::Backend("connection reset".to_string()))
    }
}

/// Knobs of a test harness.
#[derive(Default)]
pub struct HarnessOptions {
    pub fetch_delay: Duration,
    pub refused: Option<QueueName>,
    pub reject_rate_limit: bool,
    pub poll_lock_wait: Option<Duration>,
    pub broken_locks: bool,
}

/// A consumer wired to mocks, with handles to inspect them.
pub struct Harness {
    pub broker: Arc<MockBroker>,
    pub connector: Arc<MockConnector>,
    pub locks: Arc<MemoryLockService>,
    pub sink: Arc<CollectingSink>,
    pub consumer: JobConsumer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(options: HarnessOptions) -> Self {
        let broker = MockBroker::new(options.fetch_delay);
        let connector = Arc::new(MockConnector::new(broker.clone(), options.refused));
        let locks = Arc::new(MemoryLockService::new());
        let sink = Arc::new(CollectingSink::default());

        let lock_service: Arc<dyn LockService> = if options.broken_locks {
            Arc::new(BrokenLockService)
        } else {
            locks.clone()
        };

        let mut consumer = JobConsumer::new(
            Arc::new(WorkerRegistry::new(connector.clone())),
            lock_service,
            Arc::new(RecordingRateLimiter {
                broker: broker.clone(),
                reject: options.reject_rate_limit,
            }),
            sink.clone(),
        );
        if let Some(wait) = options.poll_lock_wait {
            consumer = consumer.with_poll_lock_wait(wait);
        }

        Self {
            broker,
            connector,
            locks,
            sink,
            consumer,
        }
    }
}
