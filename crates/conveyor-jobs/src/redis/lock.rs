//! Distributed poll lock on Redis.

use super::RedisKeys;
use crate::lock::{Lease, LockError, LockService};
use async_trait::async_trait;
use deadpool_redis::Pool;
use std::time::{Duration, Instant};
use tracing::{trace, warn};
use uuid::Uuid;

/// Pause between acquisition attempts while the lock is held elsewhere.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

fn backend<E: std::fmt::Display>(e: E) -> LockError {
    LockError::Backend(e.to_string())
}

/// Lock service backed by `SET NX PX` leases.
///
/// A lease that is never released expires after `lease_ttl`.
pub struct RedisLockService {
    pool: Pool,
    keys: RedisKeys,
    lease_ttl: Duration,
}

impl RedisLockService {
    /// Create a lock service over `pool`.
    pub fn new(pool: Pool, keys: RedisKeys, lease_ttl: Duration) -> Self {
        Self {
            pool,
            keys,
            lease_ttl,
        }
    }

    async fn try_set(&self, redis_key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self.pool.get().await.map_err(backend)?;
        let result: Option<String> = redis::cmd("SET")
            .arg(redis_key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.lease_ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(result.is_some())
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn acquire(&self, key: &str, wait: Duration) -> Result<Box<dyn Lease>, LockError> {
        let redis_key = self.keys.lease(key);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.try_set(&redis_key, &token).await? {
                trace!(key = %key, "Acquired redis lock");
                return Ok(Box::new(RedisLease {
                    pool: self.pool.clone(),
                    name: key.to_string(),
                    redis_key,
                    token,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: wait,
                });
            }
            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// A held Redis lease.
pub struct RedisLease {
    pool: Pool,
    name: String,
    redis_key: String,
    token: String,
}

#[async_trait]
impl Lease for RedisLease {
    fn key(&self) -> &str {
        &self.name
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut conn = self.pool.get().await.map_err(backend)?;

        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.redis_key)
            .arg(&self.token)
            .invoke_async(&mut *conn)
            .await
            .map_err(backend)?;

        if deleted == 0 {
            warn!(key = %self.name, "Lease expired before release");
        } else {
            trace!(key = %self.name, "Released redis lock");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLease")
            .field("name", &self.name)
            .field("redis_key", &self.redis_key)
            .finish_non_exhaustive()
    }
}
