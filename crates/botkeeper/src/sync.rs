//! Keyed async locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A set of async mutexes addressed by string key.
///
/// Callers holding the lock for one key never block callers of another key.
/// Locks are created lazily and shared via `Arc`, so a guard stays valid even
/// if the key is removed while it is held.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for `key`.
    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return lock.clone();
        }
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for `key` once nobody else references it.
    pub fn remove(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn same_key_returns_same_lock() {
        let locks = KeyedLocks::new();
        let a = locks.get("one");
        let b = locks.get("one");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let a = locks.get("a");
        let _guard = a.lock().await;

        let b = locks.get("b");
        let acquired = tokio::time::timeout(Duration::from_millis(100), b.lock()).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn remove_keeps_lock_while_held() {
        let locks = KeyedLocks::new();
        let held = locks.get("a");
        locks.remove("a");
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.remove("a");
        assert!(locks.is_empty());
    }
}
