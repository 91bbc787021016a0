//! Live Redis tests for the count cache
//!
//! Needs a reachable server (`FEATUREVOTE_TEST_REDIS`, default
//! `redis://127.0.0.1:6379/15`). Run with `cargo test --features heavy-tests`.

#![cfg(feature = "heavy-tests")]

use featurevote::cache::{CountCache, RedisCountCache};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(60);

async fn cache() -> RedisCountCache {
    let url = std::env::var("FEATUREVOTE_TEST_REDIS")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    RedisCountCache::connect(&url).await.unwrap()
}

#[tokio::test]
async fn test_redis_conditional_deltas() {
    let cache = cache().await;
    let id = Uuid::new_v4();

    assert_eq!(cache.get(id).await.unwrap(), None);
    assert_eq!(cache.increment(id).await.unwrap(), None);
    assert_eq!(cache.decrement(id).await.unwrap(), None);
    assert_eq!(cache.get(id).await.unwrap(), None);

    cache.set(id, 0, TTL).await.unwrap();
    assert_eq!(cache.get(id).await.unwrap(), Some(0));
    assert_eq!(cache.increment(id).await.unwrap(), Some(1));
    assert_eq!(cache.decrement(id).await.unwrap(), Some(0));

    // Would go negative: dropped rather than stored
    assert_eq!(cache.decrement(id).await.unwrap(), None);
    assert_eq!(cache.get(id).await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_delete_and_expiry() {
    let cache = cache().await;
    let id = Uuid::new_v4();

    cache.set(id, 7, TTL).await.unwrap();
    cache.delete(id).await.unwrap();
    assert_eq!(cache.get(id).await.unwrap(), None);

    cache.set(id, 7, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(cache.get(id).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_increments() {
    let cache = Arc::new(cache().await);
    let id = Uuid::new_v4();
    cache.set(id, 0, TTL).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.increment(id).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(cache.get(id).await.unwrap(), Some(50));
    cache.delete(id).await.unwrap();
}
