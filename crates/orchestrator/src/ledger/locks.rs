#![forbid(unsafe_code)]

use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table size above which released entries are swept on the next acquire.
const SWEEP_THRESHOLD: usize = 64;

/// One async mutex per key, created on demand.
///
/// The table only keeps weak references, so a key's mutex lives exactly as
/// long as someone holds or waits for it. Holders of distinct keys never
/// contend beyond the brief table lookup.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    table: Mutex<FxHashMap<K, Weak<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            table: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the mutex for `key` is free and take it.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().await;
            if table.len() >= SWEEP_THRESHOLD {
                table.retain(|_, slot| slot.strong_count() > 0);
            }
            match table.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(Mutex::new(()));
                    table.insert(key.clone(), Arc::downgrade(&slot));
                    slot
                }
            }
        };
        slot.lock_owned().await
    }

    /// Number of keys currently held or waited for.
    #[cfg(test)]
    async fn active(&self) -> usize {
        self.table
            .lock()
            .await
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let held = locks.lock(&"a").await;

        let blocked = timeout(Duration::from_millis(50), locks.lock(&"a")).await;
        assert!(blocked.is_err(), "second lock on the same key must wait");

        drop(held);
        let reacquired = timeout(Duration::from_millis(500), locks.lock(&"a")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(&"a").await;
        let b = timeout(Duration::from_millis(500), locks.lock(&"b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active().await, 2);
    }

    #[tokio::test]
    async fn released_keys_are_swept() {
        let locks = KeyedLocks::new();
        for key in 0..SWEEP_THRESHOLD * 2 {
            drop(locks.lock(&key).await);
        }
        assert_eq!(locks.active().await, 0);
        assert!(locks.table.lock().await.len() <= SWEEP_THRESHOLD + 1);
    }
}
