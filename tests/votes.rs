//! Vote coordinator tests against both store backends

use chrono::Utc;
use featurevote::cache::{CountCache, MemoryCountCache};
use featurevote::common::{Error, MetricsRegistry, Retry, RetryPolicy};
use featurevote::store::{Feature, FeatureStatus, FeatureStore, MemoryStore, RocksStore, VoteStore};
use featurevote::VoteCoordinator;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

const TTL: Duration = Duration::from_secs(3600);

struct Harness<S> {
    store: Arc<S>,
    cache: Arc<MemoryCountCache>,
    coordinator: Arc<VoteCoordinator>,
}

fn harness<S: VoteStore + FeatureStore + 'static>(store: S) -> Harness<S> {
    let store = Arc::new(store);
    let cache = Arc::new(MemoryCountCache::new());
    let votes: Arc<dyn VoteStore> = Arc::new(Retry::new(store.clone(), RetryPolicy::default()));
    let coordinator = Arc::new(VoteCoordinator::new(
        votes,
        cache.clone(),
        TTL,
        Arc::new(MetricsRegistry::new()),
    ));
    Harness {
        store,
        cache,
        coordinator,
    }
}

fn rocks() -> (TempDir, RocksStore) {
    let dir = TempDir::new().unwrap();
    let store = RocksStore::open(dir.path().join("db"), 1000).unwrap();
    (dir, store)
}

async fn feature<S: FeatureStore>(store: &S) -> Uuid {
    let now = Utc::now();
    store
        .create_feature(Feature {
            id: Uuid::new_v4(),
            title: "Keyboard shortcuts".into(),
            description: String::new(),
            status: FeatureStatus::Open,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap()
        .id
}

async fn vote_lifecycle<S: VoteStore + FeatureStore + 'static>(h: Harness<S>) {
    let f = feature(h.store.as_ref()).await;
    let u = Uuid::new_v4();

    assert_eq!(h.coordinator.read_count(f).await.unwrap(), 0);
    assert_eq!(h.cache.get(f).await.unwrap(), Some(0));

    h.coordinator.upvote(u, f).await.unwrap();
    assert_eq!(h.cache.get(f).await.unwrap(), Some(1));

    assert!(matches!(
        h.coordinator.upvote(u, f).await,
        Err(Error::AlreadyVoted)
    ));
    assert_eq!(h.cache.get(f).await.unwrap(), Some(1));
    assert_eq!(h.store.count_votes(f).await.unwrap(), 1);

    h.coordinator.unvote(u, f).await.unwrap();
    assert_eq!(h.cache.get(f).await.unwrap(), Some(0));

    assert!(matches!(
        h.coordinator.unvote(u, f).await,
        Err(Error::NotVoted)
    ));
    assert_eq!(h.cache.get(f).await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_vote_lifecycle_memory() {
    vote_lifecycle(harness(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_vote_lifecycle_rocksdb() {
    let (_dir, store) = rocks();
    vote_lifecycle(harness(store)).await;
}

async fn wiped_cache_recomputes<S: VoteStore + FeatureStore + 'static>(h: Harness<S>) {
    let f = feature(h.store.as_ref()).await;
    for _ in 0..3 {
        h.coordinator.upvote(Uuid::new_v4(), f).await.unwrap();
    }
    let before = h.coordinator.read_count(f).await.unwrap();

    h.cache.clear().unwrap();
    assert_eq!(h.cache.get(f).await.unwrap(), None);

    let after = h.coordinator.read_count(f).await.unwrap();
    assert_eq!(after, 3);
    assert_eq!(after, before);
    assert_eq!(h.cache.get(f).await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_wiped_cache_recomputes_memory() {
    wiped_cache_recomputes(harness(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_wiped_cache_recomputes_rocksdb() {
    let (_dir, store) = rocks();
    wiped_cache_recomputes(harness(store)).await;
}

async fn duplicate_race<S: VoteStore + FeatureStore + 'static>(h: Harness<S>) {
    let f = feature(h.store.as_ref()).await;
    let u = Uuid::new_v4();
    h.coordinator.read_count(f).await.unwrap();

    let attempts = (0..32).map(|_| {
        let c = h.coordinator.clone();
        tokio::spawn(async move { c.upvote(u, f).await })
    });
    let results = join_all(attempts).await;

    let mut created = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => created += 1,
            Err(Error::AlreadyVoted) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(h.store.count_votes(f).await.unwrap(), 1);
    assert_eq!(h.coordinator.read_count(f).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_race_memory() {
    duplicate_race(harness(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_race_rocksdb() {
    let (_dir, store) = rocks();
    duplicate_race(harness(store)).await;
}

/// Many users voting and unvoting at once leave the cache equal to the store
async fn mixed_traffic<S: VoteStore + FeatureStore + 'static>(h: Harness<S>) {
    let f = feature(h.store.as_ref()).await;
    let users: Vec<Uuid> = (0..24).map(|_| Uuid::new_v4()).collect();
    h.coordinator.read_count(f).await.unwrap();

    let ups = users.iter().map(|&u| {
        let c = h.coordinator.clone();
        tokio::spawn(async move { c.upvote(u, f).await.map(|_| ()) })
    });
    for r in join_all(ups).await {
        r.unwrap().unwrap();
    }

    let downs = users.iter().step_by(3).map(|&u| {
        let c = h.coordinator.clone();
        tokio::spawn(async move { c.unvote(u, f).await })
    });
    for r in join_all(downs).await {
        r.unwrap().unwrap();
    }

    let truth = h.store.count_votes(f).await.unwrap();
    assert_eq!(truth, 16);
    assert_eq!(h.cache.get(f).await.unwrap(), Some(truth));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_traffic_memory() {
    mixed_traffic(harness(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_traffic_rocksdb() {
    let (_dir, store) = rocks();
    mixed_traffic(harness(store)).await;
}

#[tokio::test]
async fn test_votes_survive_restart_cache_rebuilds() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let f;
    {
        let h = harness(RocksStore::open(&path, 1000).unwrap());
        f = feature(h.store.as_ref()).await;
        for _ in 0..2 {
            h.coordinator.upvote(Uuid::new_v4(), f).await.unwrap();
        }
    }

    // Fresh process: empty cache, same durable votes
    let h = harness(RocksStore::open(&path, 1000).unwrap());
    assert_eq!(h.cache.get(f).await.unwrap(), None);
    assert_eq!(h.coordinator.read_count(f).await.unwrap(), 2);
}
