//! Redis broker session: one pool and one stalled-check task per queue.

use super::{build_pool, RedisKeys};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId, PollToken};
use crate::metrics::ConsumerMetrics;
use crate::queue::{QueueName, WorkerOptions};
use crate::worker::{BrokerConnector, BrokerSession};
use async_trait::async_trait;
use chrono::Utc;
use conveyor_config::RedisConfig;
use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Failure reason of a job failed by the stalled check.
pub const STALLED_FAILURE_REASON: &str = "job stalled more than allowable limit";

/// Locks a moved job with the poll token and returns its hash.
///
/// Returns an empty hash without locking when the job vanished, or when the
/// stalled check already took the id back out of the active list.
///
/// KEYS: job hash, job lock, active list.
/// ARGV: token, lock duration ms, now ms, job id.
const FETCH_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        redis.call("LREM", KEYS[3], 0, ARGV[4])
        return {}
    end
    if not redis.call("LPOS", KEYS[3], ARGV[4]) then
        return {}
    end
    redis.call("SET", KEYS[2], ARGV[1], "PX", ARGV[2])
    redis.call("HSET", KEYS[1], "processedOn", ARGV[3])
    return redis.call("HGETALL", KEYS[1])
"#;

/// Moves a locked active job to a finished set.
///
/// KEYS: job hash, job lock, active list, finished set.
/// ARGV: token, job id, now ms, result field, result value, count attempt.
const FINISH_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[1]) == 0 then
        return -1
    end
    local lock = redis.call("GET", KEYS[2])
    if not lock then
        return -2
    end
    if lock ~= ARGV[1] then
        return -6
    end
    if redis.call("LREM", KEYS[3], -1, ARGV[2]) == 0 then
        return -3
    end
    redis.call("ZADD", KEYS[4], ARGV[3], ARGV[2])
    redis.call("HSET", KEYS[1], "finishedOn", ARGV[3], ARGV[4], ARGV[5])
    if ARGV[6] == "1" then
        redis.call("HINCRBY", KEYS[1], "attemptsMade", 1)
    end
    redis.call("DEL", KEYS[2])
    return 0
"#;

/// Requeues or fails active jobs that stayed unlocked across two checks.
///
/// Ids marked by the previous run are recovered only if they are still
/// unlocked and still active. Every unlocked active id is then marked for
/// the next run, so a job between its move and its lock is never taken.
///
/// KEYS: stalled set, active list, wait list, failed set.
/// ARGV: job key prefix, max stalled count, now ms, failure reason.
const STALLED_SCRIPT: &str = r#"
    local recovered = 0
    local failed = 0
    local marked = redis.call("SMEMBERS", KEYS[1])
    redis.call("DEL", KEYS[1])
    for _, id in ipairs(marked) do
        local jobKey = ARGV[1] .. id
        if redis.call("EXISTS", jobKey .. ":lock") == 0
            and redis.call("LREM", KEYS[2], 1, id) > 0 then
            if redis.call("EXISTS", jobKey) == 1 then
                local stalled = redis.call("HINCRBY", jobKey, "stalledCounter", 1)
                if stalled > tonumber(ARGV[2]) then
                    redis.call("ZADD", KEYS[4], ARGV[3], id)
                    redis.call("HSET", jobKey, "finishedOn", ARGV[3], "failedReason", ARGV[4])
                    failed = failed + 1
                else
                    redis.call("RPUSH", KEYS[3], id)
                    recovered = recovered + 1
                end
            end
        end
    end
    for _, id in ipairs(redis.call("LRANGE", KEYS[2], 0, -1)) do
        if redis.call("EXISTS", ARGV[1] .. id .. ":lock") == 0 then
            redis.call("SADD", KEYS[1], id)
        end
    end
    return {recovered, failed}
"#;

/// Maps a status code of the finish script to a result.
fn check_finish(code: i64, job_id: &JobId, expected: &str) -> JobResult<()> {
    match code {
        0 => Ok(()),
        -1 => Err(JobError::NotFound(job_id.to_string())),
        -2 => Err(JobError::LockMissing(job_id.to_string())),
        -6 => Err(JobError::LockMismatch(job_id.to_string())),
        _ => Err(JobError::InvalidState {
            job_id: job_id.to_string(),
            expected: expected.to_string(),
        }),
    }
}

/// Opens one Redis pool per queue.
pub struct RedisConnector {
    config: RedisConfig,
}

impl RedisConnector {
    /// Create a connector for the given Redis settings.
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConnector for RedisConnector {
    async fn connect(
        &self,
        queue: QueueName,
        options: &WorkerOptions,
    ) -> JobResult<Arc<dyn BrokerSession>> {
        let pool = build_pool(&self.config).map_err(|e| JobError::Connection {
            queue: queue.to_string(),
            message: e.to_string(),
        })?;
        let keys = RedisKeys::new(&self.config.key_prefix);

        Ok(Arc::new(RedisSession::new(queue, options.clone(), pool, keys)))
    }
}

/// Redis session for one queue.
pub struct RedisSession {
    queue: QueueName,
    options: WorkerOptions,
    pool: Pool,
    keys: RedisKeys,
    shutdown_tx: broadcast::Sender<()>,
    stalled_check: Mutex<Option<JoinHandle<()>>>,
}

impl RedisSession {
    /// Create a session over an existing pool.
    pub fn new(queue: QueueName, options: WorkerOptions, pool: Pool, keys: RedisKeys) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            options,
            pool,
            keys,
            shutdown_tx,
            stalled_check: Mutex::new(None),
        }
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn finish(
        &self,
        job: &Job,
        token: &PollToken,
        finished_set: String,
        field: &str,
        value: &str,
        count_attempt: bool,
    ) -> JobResult<i64> {
        let mut conn = self.conn().await?;
        let code: i64 = redis::Script::new(FINISH_SCRIPT)
            .key(self.keys.job(self.queue, job.id.as_str()))
            .key(self.keys.job_lock(self.queue, job.id.as_str()))
            .key(self.keys.active(self.queue))
            .key(finished_set)
            .arg(token.as_str())
            .arg(job.id.as_str())
            .arg(Utc::now().timestamp_millis())
            .arg(field)
            .arg(value)
            .arg(if count_attempt { "1" } else { "0" })
            .invoke_async(&mut *conn)
            .await?;
        Ok(code)
    }

    /// Runs one stalled check now and returns `(recovered, failed)`.
    pub async fn check_stalled(&self) -> JobResult<(u64, u64)> {
        check_stalled(&self.pool, &self.keys, self.queue, &self.options).await
    }
}

/// Runs one stalled check.
async fn check_stalled(
    pool: &Pool,
    keys: &RedisKeys,
    queue: QueueName,
    options: &WorkerOptions,
) -> JobResult<(u64, u64)> {
    let mut conn = pool.get().await?;
    let counts: (u64, u64) = redis::Script::new(STALLED_SCRIPT)
        .key(keys.stalled(queue))
        .key(keys.active(queue))
        .key(keys.wait(queue))
        .key(keys.failed(queue))
        .arg(keys.job_prefix(queue))
        .arg(options.max_stalled_count)
        .arg(Utc::now().timestamp_millis())
        .arg(STALLED_FAILURE_REASON)
        .invoke_async(&mut *conn)
        .await?;
    Ok(counts)
}

#[async_trait]
impl BrokerSession for RedisSession {
    async fn wait_until_ready(&self) -> JobResult<()> {
        let mut conn = self.conn().await.map_err(|e| JobError::Connection {
            queue: self.queue.to_string(),
            message: e.to_string(),
        })?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        debug!(queue = %self.queue, "Redis session ready");
        Ok(())
    }

    async fn start_stalled_check_timer(&self) -> JobResult<()> {
        let mut slot = self.stalled_check.lock();
        if slot.is_some() {
            return Ok(());
        }

        let pool = self.pool.clone();
        let keys = self.keys.clone();
        let queue = self.queue;
        let options = self.options.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(options.stalled_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match check_stalled(&pool, &keys, queue, &options).await {
                            Ok((recovered, failed)) => {
                                if recovered > 0 || failed > 0 {
                                    warn!(queue = %queue, recovered, failed, "Recovered stalled jobs");
                                }
                                ConsumerMetrics::stalled(queue, recovered, failed);
                            }
                            Err(e) => error!(queue = %queue, error = %e, "Stalled check failed"),
                        }
                    }
                }
            }
            debug!(queue = %queue, "Stalled check stopped");
        }));

        Ok(())
    }

    async fn fetch_next(&self, token: &PollToken) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;

        let moved: Option<String> = redis::cmd("BLMOVE")
            .arg(self.keys.wait(self.queue))
            .arg(self.keys.active(self.queue))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(self.options.drain_delay.as_secs_f64())
            .query_async(&mut *conn)
            .await?;

        let Some(id) = moved else {
            return Ok(None);
        };

        let fields: HashMap<String, String> = redis::Script::new(FETCH_SCRIPT)
            .key(self.keys.job(self.queue, &id))
            .key(self.keys.job_lock(self.queue, &id))
            .key(self.keys.active(self.queue))
            .arg(token.as_str())
            .arg(self.options.lock_duration.as_millis() as u64)
            .arg(Utc::now().timestamp_millis())
            .arg(&id)
            .invoke_async(&mut *conn)
            .await?;

        let job = Job::from_fields(self.queue, JobId::from(id.clone()), &fields)?;
        if job.is_none() {
            warn!(queue = %self.queue, job_id = %id, "Fetched id has no lockable job");
        }
        Ok(job)
    }

    async fn resolve_by_id(&self, id: &JobId) -> JobResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> =
            conn.hgetall(self.keys.job(self.queue, id.as_str())).await?;
        Job::from_fields(self.queue, id.clone(), &fields)
    }

    async fn mark_completed(&self, job: &Job, token: &PollToken) -> JobResult<()> {
        let code = self
            .finish(job, token, self.keys.completed(self.queue), "returnvalue", "{}", false)
            .await?;
        check_finish(code, &job.id, "active")
    }

    async fn mark_failed(&self, job: &Job, token: &PollToken, reason: &str) -> JobResult<()> {
        let code = self
            .finish(job, token, self.keys.failed(self.queue), "failedReason", reason, true)
            .await?;
        check_finish(code, &job.id, "active")
    }

    async fn close(&self) -> JobResult<()> {
        let _ = self.shutdown_tx.send(());

        let handle = self.stalled_check.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(queue = %self.queue, error = %e, "Stalled check task ended abnormally");
            }
        }

        self.pool.close();
        info!(queue = %self.queue, "Redis session closed");
        Ok(())
    }
}
