//! Per-Key Async Locks
//!
//! `KeyedLocks` hands out an async mutex guard per string key. It backs the two
//! serialization points of the core:
//!
//! - KV writes are serialized per node id
//! - normalization runs are serialized per document id
//!
//! Different keys never contend. Entries are held weakly and pruned once no
//! guard or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry size above which dead entries are pruned on the next `lock`
const PRUNE_THRESHOLD: usize = 256;

/// Registry of async mutexes keyed by string
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting while another task holds it
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self.entry(key);
        mutex.lock_owned().await
    }

    /// Try to acquire the lock for `key` without waiting
    pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Number of keys with a live mutex
    pub fn active_keys(&self) -> usize {
        let registry = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        registry.values().filter(|w| w.strong_count() > 0).count()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut registry = self.locks.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(existing) = registry.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        if registry.len() >= PRUNE_THRESHOLD {
            registry.retain(|_, w| w.strong_count() > 0);
        }

        let mutex = Arc::new(AsyncMutex::new(()));
        registry.insert(key.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}
