//! Per-key async locks.
//!
//! Writers of the same cache key serialise on one `tokio::sync::Mutex`;
//! eviction only claims victims whose lock is free. Entries are dropped from
//! the map once no guard or waiter references them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Default, Clone)]
pub(crate) struct KeyedLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard {
        let lock = self.entry(key);
        let guard = lock.lock_owned().await;
        self.guard(key, guard)
    }

    /// Claim `key` only if nobody else holds it.
    pub(crate) fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        let lock = self.entry(key);
        let guard = lock.try_lock_owned().ok()?;
        Some(self.guard(key, guard))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.lock().len()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyGuard {
        KeyGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }
}

/// Exclusive claim on one key; released on drop.
pub(crate) struct KeyGuard {
    key: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    #[cfg(test)]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(&self.key) {
            // Only the map itself still references the mutex.
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_lock_fails_while_held() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("recipe:1").await;

        assert!(locks.try_lock("recipe:1").is_none());
        assert!(locks.try_lock("recipe:2").is_some());

        drop(guard);
        assert!(locks.try_lock("recipe:1").is_some());
    }

    #[tokio::test]
    async fn test_released_keys_are_pruned() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.try_lock("b");
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("k").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let guard = locks.lock("k").await;
                guard.key().to_string()
            })
        };

        tokio::task::yield_now().await;
        drop(guard);

        assert_eq!(waiter.await.unwrap(), "k");
    }
}
