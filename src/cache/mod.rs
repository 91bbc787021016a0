//! Vote count cache
//!
//! A disposable shadow of `count(votes where feature = id)`. Nothing here is
//! authoritative: any entry may vanish at any time and the next read
//! rebuilds it from the store.
//!
//! `increment`/`decrement` are conditional deltas: they only touch a key that
//! is already present and never create one. They return the new value, or
//! `None` when the key was absent and nothing was written.

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

pub use memory::MemoryCountCache;
#[cfg(feature = "redis-cache")]
pub use self::redis::RedisCountCache;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::common::retry::{retry, Retry};
use crate::common::Result;

/// Key used by shared cache backends
pub fn cache_key(feature_id: Uuid) -> String {
    format!("feature:{}:votes", feature_id)
}

#[async_trait]
pub trait CountCache: Send + Sync {
    /// Cached count, `None` when absent (never a default of 0)
    async fn get(&self, feature_id: Uuid) -> Result<Option<u64>>;

    /// Populate or overwrite with an expiry
    async fn set(&self, feature_id: Uuid, value: u64, ttl: Duration) -> Result<()>;

    /// +1 if present
    async fn increment(&self, feature_id: Uuid) -> Result<Option<u64>>;

    /// -1 if present. An entry that would go negative is dropped instead.
    async fn decrement(&self, feature_id: Uuid) -> Result<Option<u64>>;

    async fn delete(&self, feature_id: Uuid) -> Result<()>;
}

#[async_trait]
impl<C: CountCache + ?Sized> CountCache for Retry<Arc<C>> {
    async fn get(&self, feature_id: Uuid) -> Result<Option<u64>> {
        retry(&self.policy, "cache_get", || self.inner.get(feature_id)).await
    }

    async fn set(&self, feature_id: Uuid, value: u64, ttl: Duration) -> Result<()> {
        retry(&self.policy, "cache_set", || {
            self.inner.set(feature_id, value, ttl)
        })
        .await
    }

    // Deltas are not idempotent: a lost reply may hide an applied delta, so
    // they run once and callers invalidate on error.
    async fn increment(&self, feature_id: Uuid) -> Result<Option<u64>> {
        self.inner.increment(feature_id).await
    }

    async fn decrement(&self, feature_id: Uuid) -> Result<Option<u64>> {
        self.inner.decrement(feature_id).await
    }

    async fn delete(&self, feature_id: Uuid) -> Result<()> {
        retry(&self.policy, "cache_delete", || self.inner.delete(feature_id)).await
    }
}
