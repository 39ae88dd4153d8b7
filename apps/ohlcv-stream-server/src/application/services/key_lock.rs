//! Per-Key Lock Manager
//!
//! One async mutex per subscription key. Holding the lock for a key is what
//! makes a poll loop the single writer for that stream; loops for other keys
//! never wait on it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::market::SubscriptionKey;

/// Lock table keyed by subscription key.
///
/// Locks are created on first use and never removed.
#[derive(Debug, Default)]
pub struct KeyLockManager {
    locks: Mutex<HashMap<SubscriptionKey, Arc<AsyncMutex<()>>>>,
    held: Mutex<HashMap<SubscriptionKey, OwnedMutexGuard<()>>>,
}

impl KeyLockManager {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until exclusive ownership of `key` is obtained.
    pub async fn acquire(&self, key: &SubscriptionKey) {
        let lock = self.lock_for(key);
        let guard = lock.lock_owned().await;
        self.held.lock().insert(key.clone(), guard);
        tracing::trace!(key = %key, "Key lock acquired");
    }

    /// Release ownership of `key`.
    ///
    /// Returns `false` (and changes nothing) if the lock was not held.
    pub fn release(&self, key: &SubscriptionKey) -> bool {
        let guard = self.held.lock().remove(key);
        if guard.is_none() {
            tracing::debug!(key = %key, "Release of a key lock that is not held");
            return false;
        }
        tracing::trace!(key = %key, "Key lock released");
        true
    }

    /// Whether `key` is currently owned. Racy; diagnostics only.
    #[must_use]
    pub fn is_locked(&self, key: &SubscriptionKey) -> bool {
        self.locks
            .lock()
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of keys that ever had a lock created.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn lock_for(&self, key: &SubscriptionKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.locks.lock().entry(key.clone()).or_default())
    }
}

// =============================================================================
// Tests
// =============================================================================
