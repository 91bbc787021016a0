//! In-process count cache with per-entry expiry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::CountCache;
use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Mutex-guarded map; each operation is one critical section, so the
/// conditional deltas are atomic with respect to `set` and `delete`.
#[derive(Default)]
pub struct MemoryCountCache {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

impl MemoryCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Internal("count cache lock poisoned".into()))
    }

    /// Drop everything, as an external flush would
    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    /// Apply `delta` to a live entry. Expired entries count as absent.
    fn apply(&self, feature_id: Uuid, delta: i64) -> Result<Option<u64>> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        let entry = match entries.get_mut(&feature_id) {
            Some(entry) if entry.is_live(now) => entry,
            Some(_) => {
                entries.remove(&feature_id);
                return Ok(None);
            }
            None => return Ok(None),
        };

        match entry.value.checked_add_signed(delta) {
            Some(value) => {
                entry.value = value;
                Ok(Some(value))
            }
            None => {
                // Below zero means the entry had drifted; let the next read rebuild it
                tracing::warn!(feature = %feature_id, "cached count underflow, dropping entry");
                entries.remove(&feature_id);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CountCache for MemoryCountCache {
    async fn get(&self, feature_id: Uuid) -> Result<Option<u64>> {
        let mut entries = self.lock()?;
        match entries.get(&feature_id) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(Some(entry.value)),
            Some(_) => {
                entries.remove(&feature_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, feature_id: Uuid, value: u64, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.lock()?.insert(feature_id, Entry { value, expires_at });
        Ok(())
    }

    async fn increment(&self, feature_id: Uuid) -> Result<Option<u64>> {
        self.apply(feature_id, 1)
    }

    async fn decrement(&self, feature_id: Uuid) -> Result<Option<u64>> {
        self.apply(feature_id, -1)
    }

    async fn delete(&self, feature_id: Uuid) -> Result<()> {
        self.lock()?.remove(&feature_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_absent_is_not_zero() {
        let cache = MemoryCountCache::new();
        let id = Uuid::new_v4();
        assert_eq!(cache.get(id).await.unwrap(), None);

        cache.set(id, 0, TTL).await.unwrap();
        assert_eq!(cache.get(id).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_delta_on_absent_key_creates_nothing() {
        let cache = MemoryCountCache::new();
        let id = Uuid::new_v4();

        assert_eq!(cache.increment(id).await.unwrap(), None);
        assert_eq!(cache.decrement(id).await.unwrap(), None);
        assert_eq!(cache.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_decrement_present_key() {
        let cache = MemoryCountCache::new();
        let id = Uuid::new_v4();
        cache.set(id, 2, TTL).await.unwrap();

        assert_eq!(cache.increment(id).await.unwrap(), Some(3));
        assert_eq!(cache.decrement(id).await.unwrap(), Some(2));
        assert_eq!(cache.get(id).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let cache = MemoryCountCache::new();
        let id = Uuid::new_v4();
        cache.set(id, 0, TTL).await.unwrap();

        assert_eq!(cache.decrement(id).await.unwrap(), None);
        assert_eq!(cache.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent() {
        let cache = MemoryCountCache::new();
        let id = Uuid::new_v4();
        cache.set(id, 5, Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.increment(id).await.unwrap(), None);
        assert_eq!(cache.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = MemoryCountCache::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.set(a, 1, TTL).await.unwrap();
        cache.set(b, 2, TTL).await.unwrap();

        cache.delete(a).await.unwrap();
        assert_eq!(cache.get(a).await.unwrap(), None);
        assert_eq!(cache.get(b).await.unwrap(), Some(2));

        cache.clear().unwrap();
        assert_eq!(cache.get(b).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_deltas_commute() {
        let cache = Arc::new(MemoryCountCache::new());
        let id = Uuid::new_v4();
        cache.set(id, 100, TTL).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..200 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    cache.increment(id).await.unwrap();
                } else {
                    cache.decrement(id).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(cache.get(id).await.unwrap(), Some(100));
    }
}
