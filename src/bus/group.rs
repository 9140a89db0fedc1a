//! Per-key serialization of cache work.
//!
//! All reads and mutations of one expanded URL's cached response are
//! funneled through its group lock: within a key, work runs sequentially;
//! across keys, concurrently. Idle entries are reclaimed with
//! [`GroupLocks::remove_idle`] once the URL is evicted.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// A map of named async mutexes.
#[derive(Default)]
pub struct GroupLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GroupLocks {
    #[must_use]
    pub fn new() -> Self {
        GroupLocks::default()
    }

    /// Enter the serialization region for `key`, waiting behind any holder.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Drop the entry for `key` if nothing holds or awaits it.
    pub fn remove_idle(&self, key: &str) {
        let mut locks = self.locks.lock();
        if let Some(mutex) = locks.get(key) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(key);
            }
        }
    }
}
