//! RocksDB-backed store
//!
//! Layout (one column family each):
//! - `features`:  feature id (16 bytes) -> bincode `Feature`
//! - `votes`:     feature id ++ user id (32 bytes) -> bincode `Vote`
//! - `users`:     user id -> bincode `User`
//! - `usernames`: username -> user id
//! - `emails`:    lowercased email -> user id
//!
//! Writes run in pessimistic transactions. A vote insert takes an exclusive
//! lock on its (feature, user) key and a shared lock on the feature record;
//! feature deletion takes the exclusive feature lock before scanning votes,
//! so a vote can neither be duplicated nor outlive its feature.

use async_trait::async_trait;
use rocksdb::{
    ColumnFamily, Direction, IteratorMode, Options, Transaction, TransactionDB,
    TransactionDBOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::{email_key, Feature, FeaturePatch, FeatureStore, User, UserStore, Vote, VoteStore};
use crate::common::{Error, Result};

const CF_FEATURES: &str = "features";
const CF_VOTES: &str = "votes";
const CF_USERS: &str = "users";
const CF_USERNAMES: &str = "usernames";
const CF_EMAILS: &str = "emails";

fn vote_key(feature_id: Uuid, user_id: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(feature_id.as_bytes());
    key[16..].copy_from_slice(user_id.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::Corrupted(e.to_string()))
}

fn decode_id(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| Error::Corrupted(format!("bad id: {}", e)))
}

struct Db {
    db: TransactionDB,
}

impl Db {
    fn open(path: &Path, lock_timeout_ms: u64) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(lock_timeout_ms as i64);

        let db: TransactionDB = TransactionDB::open_cf(
            &opts,
            &txn_opts,
            path,
            [CF_FEATURES, CF_VOTES, CF_USERS, CF_USERNAMES, CF_EMAILS],
        )?;

        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Internal(format!("missing column family: {}", name)))
    }

    /// Count or collect keys under a feature's vote prefix
    fn scan_votes(
        &self,
        txn: Option<&Transaction<'_, TransactionDB>>,
        feature_id: Uuid,
    ) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(CF_VOTES)?;
        let prefix = feature_id.as_bytes();
        let mode = IteratorMode::From(&prefix[..], Direction::Forward);

        let mut keys = Vec::new();
        let mut collect = |item: std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>| {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                return Ok::<bool, Error>(false);
            }
            keys.push(key);
            Ok(true)
        };

        match txn {
            Some(txn) => {
                for item in txn.iterator_cf(cf, mode) {
                    if !collect(item)? {
                        break;
                    }
                }
            }
            None => {
                for item in self.db.iterator_cf(cf, mode) {
                    if !collect(item)? {
                        break;
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Delete every vote of a feature inside `txn`
    fn cascade_in(&self, txn: &Transaction<'_, TransactionDB>, feature_id: Uuid) -> Result<u64> {
        let cf = self.cf(CF_VOTES)?;
        let keys = self.scan_votes(Some(txn), feature_id)?;
        for key in &keys {
            txn.delete_cf(cf, key)?;
        }
        Ok(keys.len() as u64)
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

// Votes
impl Db {
    fn create_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<Vote> {
        let features = self.cf(CF_FEATURES)?;
        let votes = self.cf(CF_VOTES)?;
        let key = vote_key(feature_id, user_id);

        let txn = self.db.transaction();
        // Shared lock: concurrent votes proceed, deletion of the feature waits
        if txn
            .get_for_update_cf(features, feature_id.as_bytes(), false)?
            .is_none()
        {
            return Err(Error::FeatureNotFound(feature_id));
        }
        if txn.get_for_update_cf(votes, key, true)?.is_some() {
            return Err(Error::DuplicateVote {
                user_id,
                feature_id,
            });
        }

        let vote = Vote::new(user_id, feature_id);
        txn.put_cf(votes, key, encode(&vote)?)?;
        txn.commit()?;
        Ok(vote)
    }

    fn delete_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<()> {
        let votes = self.cf(CF_VOTES)?;
        let key = vote_key(feature_id, user_id);

        let txn = self.db.transaction();
        if txn.get_for_update_cf(votes, key, true)?.is_none() {
            return Err(Error::VoteNotFound {
                user_id,
                feature_id,
            });
        }
        txn.delete_cf(votes, key)?;
        txn.commit()?;
        Ok(())
    }

    fn count_votes(&self, feature_id: Uuid) -> Result<u64> {
        Ok(self.scan_votes(None, feature_id)?.len() as u64)
    }

    fn has_voted(&self, user_id: Uuid, feature_id: Uuid) -> Result<bool> {
        let votes = self.cf(CF_VOTES)?;
        Ok(self
            .db
            .get_cf(votes, vote_key(feature_id, user_id))?
            .is_some())
    }

    fn delete_feature_cascade(&self, feature_id: Uuid) -> Result<u64> {
        let features = self.cf(CF_FEATURES)?;
        let txn = self.db.transaction();
        // Block new votes on this feature while the scan runs
        txn.get_for_update_cf(features, feature_id.as_bytes(), true)?;
        let removed = self.cascade_in(&txn, feature_id)?;
        txn.commit()?;
        Ok(removed)
    }
}

// Features
impl Db {
    fn create_feature(&self, feature: Feature) -> Result<Feature> {
        let cf = self.cf(CF_FEATURES)?;
        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(cf, feature.id.as_bytes(), true)?
            .is_some()
        {
            return Err(Error::Internal(format!("feature id collision: {}", feature.id)));
        }
        txn.put_cf(cf, feature.id.as_bytes(), encode(&feature)?)?;
        txn.commit()?;
        Ok(feature)
    }

    fn get_feature(&self, id: Uuid) -> Result<Option<Feature>> {
        self.get(CF_FEATURES, id.as_bytes())
    }

    fn list_features(&self) -> Result<Vec<Feature>> {
        let cf = self.cf(CF_FEATURES)?;
        let mut features = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            features.push(decode::<Feature>(&value)?);
        }
        features.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(features)
    }

    fn update_feature(&self, id: Uuid, patch: FeaturePatch) -> Result<Feature> {
        let cf = self.cf(CF_FEATURES)?;
        let txn = self.db.transaction();
        let mut feature: Feature = match txn.get_for_update_cf(cf, id.as_bytes(), true)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(Error::FeatureNotFound(id)),
        };
        patch.apply(&mut feature);
        txn.put_cf(cf, id.as_bytes(), encode(&feature)?)?;
        txn.commit()?;
        Ok(feature)
    }

    fn delete_feature(&self, id: Uuid) -> Result<u64> {
        let cf = self.cf(CF_FEATURES)?;
        let txn = self.db.transaction();
        if txn.get_for_update_cf(cf, id.as_bytes(), true)?.is_none() {
            return Err(Error::FeatureNotFound(id));
        }
        txn.delete_cf(cf, id.as_bytes())?;
        let removed = self.cascade_in(&txn, id)?;
        txn.commit()?;
        Ok(removed)
    }
}

// Users
impl Db {
    fn create_user(&self, user: User) -> Result<User> {
        let users = self.cf(CF_USERS)?;
        let usernames = self.cf(CF_USERNAMES)?;
        let emails = self.cf(CF_EMAILS)?;
        let email = email_key(&user.email);

        let txn = self.db.transaction();
        let username_taken = txn
            .get_for_update_cf(usernames, user.username.as_bytes(), true)?
            .is_some();
        let email_taken = txn
            .get_for_update_cf(emails, email.as_bytes(), true)?
            .is_some();
        if username_taken || email_taken {
            return Err(Error::UserExists);
        }

        txn.put_cf(usernames, user.username.as_bytes(), user.id.as_bytes())?;
        txn.put_cf(emails, email.as_bytes(), user.id.as_bytes())?;
        txn.put_cf(users, user.id.as_bytes(), encode(&user)?)?;
        txn.commit()?;
        Ok(user)
    }

    fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.get(CF_USERS, id.as_bytes())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let usernames = self.cf(CF_USERNAMES)?;
        match self.db.get_cf(usernames, username.as_bytes())? {
            Some(id) => self.get(CF_USERS, decode_id(&id)?.as_bytes()),
            None => Ok(None),
        }
    }
}

/// Durable store on a RocksDB `TransactionDB`.
///
/// Every call runs on the blocking pool: a pessimistic lock wait can take up
/// to the configured lock timeout.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>, lock_timeout_ms: u64) -> Result<Self> {
        let db = Db::open(path.as_ref(), lock_timeout_ms)?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Db) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl VoteStore for RocksStore {
    async fn create_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<Vote> {
        self.blocking(move |db| db.create_vote(user_id, feature_id)).await
    }

    async fn delete_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<()> {
        self.blocking(move |db| db.delete_vote(user_id, feature_id)).await
    }

    async fn count_votes(&self, feature_id: Uuid) -> Result<u64> {
        self.blocking(move |db| db.count_votes(feature_id)).await
    }

    async fn has_voted(&self, user_id: Uuid, feature_id: Uuid) -> Result<bool> {
        self.blocking(move |db| db.has_voted(user_id, feature_id)).await
    }

    async fn delete_feature_cascade(&self, feature_id: Uuid) -> Result<u64> {
        self.blocking(move |db| db.delete_feature_cascade(feature_id)).await
    }
}

#[async_trait]
impl FeatureStore for RocksStore {
    async fn create_feature(&self, feature: Feature) -> Result<Feature> {
        self.blocking(move |db| db.create_feature(feature)).await
    }

    async fn get_feature(&self, id: Uuid) -> Result<Option<Feature>> {
        self.blocking(move |db| db.get_feature(id)).await
    }

    async fn list_features(&self) -> Result<Vec<Feature>> {
        self.blocking(|db| db.list_features()).await
    }

    async fn update_feature(&self, id: Uuid, patch: FeaturePatch) -> Result<Feature> {
        self.blocking(move |db| db.update_feature(id, patch)).await
    }

    async fn delete_feature(&self, id: Uuid) -> Result<u64> {
        self.blocking(move |db| db.delete_feature(id)).await
    }
}

#[async_trait]
impl UserStore for RocksStore {
    async fn create_user(&self, user: User) -> Result<User> {
        self.blocking(move |db| db.create_user(user)).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.blocking(move |db| db.get_user(id)).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_string();
        self.blocking(move |db| db.find_user_by_username(&username)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FeatureStatus;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn feature() -> Feature {
        let now = Utc::now();
        Feature {
            id: Uuid::new_v4(),
            title: "Export to CSV".into(),
            description: "desc".into(),
            status: FeatureStatus::Open,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_vote_key_layout() {
        let f = Uuid::new_v4();
        let u = Uuid::new_v4();
        let key = vote_key(f, u);
        assert_eq!(&key[..16], f.as_bytes());
        assert_eq!(&key[16..], u.as_bytes());
    }

    #[tokio::test]
    async fn test_vote_lifecycle() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("db"), 1000).unwrap();
        let f = store.create_feature(feature()).await.unwrap();
        let u = Uuid::new_v4();

        let vote = store.create_vote(u, f.id).await.unwrap();
        assert_eq!(vote.feature_id, f.id);
        assert!(matches!(
            store.create_vote(u, f.id).await,
            Err(Error::DuplicateVote { .. })
        ));
        assert_eq!(store.count_votes(f.id).await.unwrap(), 1);

        store.delete_vote(u, f.id).await.unwrap();
        assert!(matches!(
            store.delete_vote(u, f.id).await,
            Err(Error::VoteNotFound { .. })
        ));
        assert_eq!(store.count_votes(f.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prefix_scan_does_not_leak_between_features() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("db"), 1000).unwrap();
        let a = store.create_feature(feature()).await.unwrap();
        let b = store.create_feature(feature()).await.unwrap();
        for _ in 0..4 {
            store.create_vote(Uuid::new_v4(), a.id).await.unwrap();
        }
        for _ in 0..2 {
            store.create_vote(Uuid::new_v4(), b.id).await.unwrap();
        }

        assert_eq!(store.count_votes(a.id).await.unwrap(), 4);
        assert_eq!(store.count_votes(b.id).await.unwrap(), 2);
        assert_eq!(store.count_votes(Uuid::new_v4()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_feature_cascades_and_blocks_votes() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("db"), 1000).unwrap();
        let f = store.create_feature(feature()).await.unwrap();
        store.create_vote(Uuid::new_v4(), f.id).await.unwrap();
        store.create_vote(Uuid::new_v4(), f.id).await.unwrap();

        assert_eq!(store.delete_feature(f.id).await.unwrap(), 2);
        assert_eq!(store.count_votes(f.id).await.unwrap(), 0);
        assert!(matches!(
            store.create_vote(Uuid::new_v4(), f.id).await,
            Err(Error::FeatureNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_wait_does_not_stall_runtime() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("db"), 2000).unwrap();
        let f = store.create_feature(feature()).await.unwrap();

        // Hold the exclusive feature lock, as a concurrent delete would
        let features = store.db.cf(CF_FEATURES).unwrap();
        let holder = store.db.db.transaction();
        holder
            .get_for_update_cf(features, f.id.as_bytes(), true)
            .unwrap();

        let waiting = tokio::spawn({
            let store = store.clone();
            async move { store.create_vote(Uuid::new_v4(), f.id).await }
        });

        // Single-threaded runtime: timers still fire while the vote waits
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(holder);
        waiting.await.unwrap().unwrap();
        assert_eq!(store.count_votes(f.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let f = feature();
        let u = Uuid::new_v4();
        {
            let store = RocksStore::open(&path, 1000).unwrap();
            store.create_feature(f.clone()).await.unwrap();
            store.create_vote(u, f.id).await.unwrap();
        }

        let store = RocksStore::open(&path, 1000).unwrap();
        assert_eq!(store.get_feature(f.id).await.unwrap().unwrap().title, f.title);
        assert!(store.has_voted(u, f.id).await.unwrap());
        assert!(matches!(
            store.create_vote(u, f.id).await,
            Err(Error::DuplicateVote { .. })
        ));
    }

    #[tokio::test]
    async fn test_user_index() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("db"), 1000).unwrap();
        let user = User {
            id: Uuid::new_v4(),
            username: "user1".into(),
            email: "u1@example.com".into(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: "hash".into(),
            created_at: Utc::now(),
        };
        store.create_user(user.clone()).await.unwrap();

        let mut dup = user.clone();
        dup.id = Uuid::new_v4();
        dup.username = "user2".into();
        dup.email = "U1@EXAMPLE.COM".into();
        assert!(matches!(store.create_user(dup).await, Err(Error::UserExists)));

        let found = store.find_user_by_username("user1").await.unwrap().unwrap();
        assert_eq!(found, user);
        assert_eq!(store.get_user(user.id).await.unwrap().unwrap(), user);
    }
}
