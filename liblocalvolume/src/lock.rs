//! Per-key serialization of lifecycle calls.
//!
//! The controller locks on volume handles and the node on mount paths, so
//! two calls for the same key never interleave their inspect-then-act
//! steps.  Calls for different keys still run concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// A table of async mutexes, one per key, created on demand.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds the lock for one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // Clone out of the map before awaiting so no shard lock is held.
        let mutex = Arc::clone(self.locks.entry(key.to_owned()).or_default().value());
        let guard = mutex.lock_owned().await;
        trace!(key, "key locked");
        KeyGuard {
            owner: self,
            key: key.to_owned(),
            guard: Some(guard),
        }
    }

    /// `true` if no key is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits.
        self.owner
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        trace!(key = %self.key, "key unlocked");
    }
}
