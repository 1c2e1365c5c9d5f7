// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Keyed async locks with bounded waits
//!
//! A slot exists only while someone holds or waits for its key; the last
//! guard to leave removes it, so the map stays as large as the contention.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::error::Elapsed;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// One async mutex per key, created on demand
#[derive(Debug)]
pub(crate) struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

/// Held lock for one key; releases and prunes on drop
#[derive(Debug)]
pub(crate) struct KeyedGuard<'a, K: Hash + Eq> {
    locks: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait at most `wait` for the lock on `key`
    pub(crate) async fn lock(&self, key: K, wait: Duration) -> Result<KeyedGuard<'_, K>, Elapsed> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.clone()).or_default().clone()
        };
        let acquired = tokio::time::timeout(wait, slot.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(KeyedGuard {
                locks: self,
                key,
                guard: Some(guard),
            }),
            Err(elapsed) => {
                self.prune(&key);
                Err(elapsed)
            }
        }
    }
}

impl<K: Hash + Eq> KeyedLocks<K> {
    /// Drop the slot when nothing but the map refers to it
    fn prune(&self, key: &K) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<K: Hash + Eq> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // the owned guard holds a reference to the slot until it is gone
        drop(self.guard.take());
        self.locks.prune(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_slots_are_pruned_after_release() {
        let locks = KeyedLocks::new();
        for i in 0..32 {
            let _guard = locks.lock(format!("TP-{i}"), WAIT).await.unwrap();
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_waiter_leaves_slot_to_holder() {
        let locks = KeyedLocks::new();
        let held = locks.lock("TP-001", WAIT).await.unwrap();
        assert!(locks.lock("TP-001", WAIT).await.is_err());
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.len(), 0);
        assert!(locks.lock("TP-001", WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_keeps_slot_alive() {
        let locks = Arc::new(KeyedLocks::new());
        let held = locks.lock("TP-001".to_string(), WAIT).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("TP-001".to_string(), Duration::from_secs(5)).await.unwrap();
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(locks.len(), 0);
    }
}
