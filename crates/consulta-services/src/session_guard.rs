//! Per-key single-flight guards
//!
//! Each session (or requester) gets its own async mutex. Timer-driven work uses
//! [`KeyedGuards::try_acquire`] and skips a busy key; user-driven work that must
//! not be dropped waits with [`KeyedGuards::acquire`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held while working on one key; released on drop
pub type KeyGuard = OwnedMutexGuard<()>;

/// Map of lazily created per-key locks
#[derive(Debug)]
pub struct KeyedGuards<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedGuards<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedGuards<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        self.slots
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Take the guard if nobody holds it
    pub fn try_acquire(&self, key: &K) -> Option<KeyGuard> {
        self.slot(key).try_lock_owned().ok()
    }

    /// Wait for the guard
    pub async fn acquire(&self, key: &K) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Forget a key once its work is finished for good
    ///
    /// A holder keeps its guard; later callers get a fresh slot.
    pub fn release(&self, key: &K) {
        self.slots.lock().remove(key);
    }

    /// Forget a key if no holder or waiter still references its slot
    ///
    /// Call after dropping the guard. Returns whether the slot was removed.
    pub fn release_idle(&self, key: &K) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if Arc::strong_count(slot) == 1 => {
                slots.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_rejects_second_holder() {
        let guards: KeyedGuards<u64> = KeyedGuards::new();

        let first = guards.try_acquire(&1);
        assert!(first.is_some());
        assert!(guards.try_acquire(&1).is_none());
        // other keys are independent
        assert!(guards.try_acquire(&2).is_some());

        drop(first);
        assert!(guards.try_acquire(&1).is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_holder() {
        let guards: Arc<KeyedGuards<u64>> = Arc::new(KeyedGuards::new());
        let held = guards.acquire(&7).await;

        let waiter = {
            let guards = guards.clone();
            tokio::spawn(async move {
                let _guard = guards.acquire(&7).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_idle_keeps_contended_slot() {
        let guards: Arc<KeyedGuards<u64>> = Arc::new(KeyedGuards::new());
        let held = guards.acquire(&4).await;

        let waiter = {
            let guards = guards.clone();
            tokio::spawn(async move {
                let _guard = guards.acquire(&4).await;
            })
        };
        tokio::task::yield_now().await;

        // the holder still references the slot
        assert!(!guards.release_idle(&4));
        drop(held);
        waiter.await.unwrap();

        assert!(guards.release_idle(&4));
        assert!(guards.is_empty());
        assert!(!guards.release_idle(&4));
    }

    #[test]
    fn test_release_forgets_key() {
        let guards: KeyedGuards<u64> = KeyedGuards::new();
        let _held = guards.try_acquire(&3);
        assert_eq!(guards.len(), 1);

        guards.release(&3);
        assert!(guards.is_empty());
    }
}
