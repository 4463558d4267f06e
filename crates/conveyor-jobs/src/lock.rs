//! Named, short-lived mutual-exclusion leases.
//!
//! `poll` holds a lease per queue while it fetches, which turns concurrent
//! callers into a serialized line of fetch attempts on one connection.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

/// Lock service errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not acquired within the allowed wait.
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    Timeout { key: String, waited: Duration },

    /// The lock backend failed.
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Returns true if the acquisition timed out (contention, not failure).
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}

/// A held lock. Dropping a lease without releasing it frees an in-memory
/// lock immediately and lets a distributed lock expire on its TTL.
#[async_trait]
pub trait Lease: Send {
    /// Name of the held lock.
    fn key(&self) -> &str;

    /// Releases the lock.
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Lock service.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquires `key`, waiting at most `wait`.
    async fn acquire(&self, key: &str, wait: Duration) -> Result<Box<dyn Lease>, LockError>;
}

/// In-process lock service.
///
/// Waiters are served in FIFO order.
#[derive(Default)]
pub struct MemoryLockService {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryLockService {
    /// Create a new in-memory lock service.
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, key: &str, wait: Duration) -> Result<Box<dyn Lease>, LockError> {
        let mutex = self.mutex_for(key);

        match tokio::time::timeout(wait, mutex.lock_owned()).await {
            Ok(guard) => {
                trace!(key = %key, "Acquired memory lock");
                Ok(Box::new(MemoryLease {
                    key: key.to_string(),
                    _guard: guard,
                }))
            }
            Err(_) => Err(LockError::Timeout {
                key: key.to_string(),
                waited: wait,
            }),
        }
    }
}

struct MemoryLease {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Lease for MemoryLease {
    fn key(&self) -> &str {
        &self.key
    }

    async fn release(self: Box<Self>) -> Result<(), LockError> {
        trace!(key = %self.key, "Released memory lock");
        Ok(())
    }
}
