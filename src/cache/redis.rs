//! Redis-backed count cache
//!
//! Counts are plain integer keys (`feature:{id}:votes`). Conditional deltas
//! run as a Lua script so the existence check, the `INCRBY` and the
//! negative guard happen in one server-side step.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use uuid::Uuid;

use super::{cache_key, CountCache};
use crate::common::{Error, Result};

/// Returns -1 for "absent, nothing written"; drops the key when it would
/// go negative.
const DELTA_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if value < 0 then
    redis.call('DEL', KEYS[1])
    return -1
end
return value
"#;

pub struct RedisCountCache {
    conn: ConnectionManager,
    delta: Script,
}

impl RedisCountCache {
    /// Connect; the manager reconnects on its own after drops
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| Error::InvalidConfig(format!("redis url {}: {}", redis_url, e)))?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url = %redis_url, "connected to redis count cache");
        Ok(Self {
            conn,
            delta: Script::new(DELTA_SCRIPT),
        })
    }

    async fn apply(&self, feature_id: Uuid, delta: i64) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .delta
            .key(cache_key(feature_id))
            .arg(delta)
            .invoke_async(&mut conn)
            .await?;
        Ok(u64::try_from(value).ok())
    }
}

#[async_trait]
impl CountCache for RedisCountCache {
    async fn get(&self, feature_id: Uuid) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(cache_key(feature_id)).await?;
        Ok(value)
    }

    async fn set(&self, feature_id: Uuid, value: u64, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(cache_key(feature_id), value, secs)
            .await?;
        Ok(())
    }

    async fn increment(&self, feature_id: Uuid) -> Result<Option<u64>> {
        self.apply(feature_id, 1).await
    }

    async fn decrement(&self, feature_id: Uuid) -> Result<Option<u64>> {
        self.apply(feature_id, -1).await
    }

    async fn delete(&self, feature_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(cache_key(feature_id)).await?;
        Ok(())
    }
}
