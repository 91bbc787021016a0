//! In-memory store
//!
//! All records live behind one `RwLock`; every write path holds the write
//! guard for its whole check-and-mutate, which is what makes the vote
//! uniqueness check atomic here.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{email_key, Feature, FeaturePatch, FeatureStore, User, UserStore, Vote, VoteStore};
use crate::common::{Error, Result};

#[derive(Default)]
struct Inner {
    features: HashMap<Uuid, Feature>,
    /// Keyed (feature, user) so one feature's votes are a contiguous range
    votes: BTreeMap<(Uuid, Uuid), Vote>,
    users: HashMap<Uuid, User>,
    usernames: HashMap<String, Uuid>,
    emails: HashMap<String, Uuid>,
}

impl Inner {
    fn votes_of(&self, feature_id: Uuid) -> impl Iterator<Item = &(Uuid, Uuid)> {
        self.votes
            .range((feature_id, Uuid::nil())..=(feature_id, Uuid::max()))
            .map(|(k, _)| k)
    }

    fn cascade(&mut self, feature_id: Uuid) -> u64 {
        let keys: Vec<(Uuid, Uuid)> = self.votes_of(feature_id).copied().collect();
        for key in &keys {
            self.votes.remove(key);
        }
        keys.len() as u64
    }
}

/// In-memory store (default for tests)
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn create_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<Vote> {
        let mut inner = self.write()?;
        if !inner.features.contains_key(&feature_id) {
            return Err(Error::FeatureNotFound(feature_id));
        }
        let key = (feature_id, user_id);
        if inner.votes.contains_key(&key) {
            return Err(Error::DuplicateVote {
                user_id,
                feature_id,
            });
        }
        let vote = Vote::new(user_id, feature_id);
        inner.votes.insert(key, vote.clone());
        Ok(vote)
    }

    async fn delete_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<()> {
        let mut inner = self.write()?;
        match inner.votes.remove(&(feature_id, user_id)) {
            Some(_) => Ok(()),
            None => Err(Error::VoteNotFound {
                user_id,
                feature_id,
            }),
        }
    }

    async fn count_votes(&self, feature_id: Uuid) -> Result<u64> {
        Ok(self.read()?.votes_of(feature_id).count() as u64)
    }

    async fn has_voted(&self, user_id: Uuid, feature_id: Uuid) -> Result<bool> {
        Ok(self.read()?.votes.contains_key(&(feature_id, user_id)))
    }

    async fn delete_feature_cascade(&self, feature_id: Uuid) -> Result<u64> {
        Ok(self.write()?.cascade(feature_id))
    }
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn create_feature(&self, feature: Feature) -> Result<Feature> {
        let mut inner = self.write()?;
        if inner.features.contains_key(&feature.id) {
            return Err(Error::Internal(format!("feature id collision: {}", feature.id)));
        }
        inner.features.insert(feature.id, feature.clone());
        Ok(feature)
    }

    async fn get_feature(&self, id: Uuid) -> Result<Option<Feature>> {
        Ok(self.read()?.features.get(&id).cloned())
    }

    async fn list_features(&self) -> Result<Vec<Feature>> {
        let mut features: Vec<Feature> = self.read()?.features.values().cloned().collect();
        features.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(features)
    }

    async fn update_feature(&self, id: Uuid, patch: FeaturePatch) -> Result<Feature> {
        let mut inner = self.write()?;
        let feature = inner
            .features
            .get_mut(&id)
            .ok_or(Error::FeatureNotFound(id))?;
        patch.apply(feature);
        Ok(feature.clone())
    }

    async fn delete_feature(&self, id: Uuid) -> Result<u64> {
        let mut inner = self.write()?;
        if inner.features.remove(&id).is_none() {
            return Err(Error::FeatureNotFound(id));
        }
        Ok(inner.cascade(id))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: User) -> Result<User> {
        let mut inner = self.write()?;
        let email = email_key(&user.email);
        if inner.usernames.contains_key(&user.username) || inner.emails.contains_key(&email) {
            return Err(Error::UserExists);
        }
        inner.usernames.insert(user.username.clone(), user.id);
        inner.emails.insert(email, user.id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let inner = self.read()?;
        Ok(inner
            .usernames
            .get(username)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FeatureStatus;
    use chrono::{Duration, Utc};

    fn feature(offset_secs: i64) -> Feature {
        let at = Utc::now() + Duration::seconds(offset_secs);
        Feature {
            id: Uuid::new_v4(),
            title: format!("feature {}", offset_secs),
            description: "desc".into(),
            status: FeatureStatus::Open,
            created_by: Uuid::new_v4(),
            created_at: at,
            updated_at: at,
        }
    }

    fn user(name: &str, email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.into(),
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: "x".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_vote_uniqueness() {
        let store = MemoryStore::new();
        let f = store.create_feature(feature(0)).await.unwrap();
        let u = Uuid::new_v4();

        store.create_vote(u, f.id).await.unwrap();
        assert!(matches!(
            store.create_vote(u, f.id).await,
            Err(Error::DuplicateVote { .. })
        ));
        assert_eq!(store.count_votes(f.id).await.unwrap(), 1);
        assert!(store.has_voted(u, f.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_vote_requires_feature() {
        let store = MemoryStore::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.create_vote(Uuid::new_v4(), missing).await,
            Err(Error::FeatureNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_delete_vote_not_found() {
        let store = MemoryStore::new();
        let f = store.create_feature(feature(0)).await.unwrap();
        assert!(matches!(
            store.delete_vote(Uuid::new_v4(), f.id).await,
            Err(Error::VoteNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_counts_are_per_feature() {
        let store = MemoryStore::new();
        let a = store.create_feature(feature(0)).await.unwrap();
        let b = store.create_feature(feature(1)).await.unwrap();
        for _ in 0..3 {
            store.create_vote(Uuid::new_v4(), a.id).await.unwrap();
        }
        store.create_vote(Uuid::new_v4(), b.id).await.unwrap();

        assert_eq!(store.count_votes(a.id).await.unwrap(), 3);
        assert_eq!(store.count_votes(b.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_feature_cascades() {
        let store = MemoryStore::new();
        let a = store.create_feature(feature(0)).await.unwrap();
        let b = store.create_feature(feature(1)).await.unwrap();
        let u = Uuid::new_v4();
        store.create_vote(u, a.id).await.unwrap();
        store.create_vote(Uuid::new_v4(), a.id).await.unwrap();
        store.create_vote(u, b.id).await.unwrap();

        assert_eq!(store.delete_feature(a.id).await.unwrap(), 2);
        assert_eq!(store.count_votes(a.id).await.unwrap(), 0);
        assert_eq!(store.count_votes(b.id).await.unwrap(), 1);
        assert!(store.get_feature(a.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_feature(a.id).await,
            Err(Error::FeatureNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = MemoryStore::new();
        let old = store.create_feature(feature(-60)).await.unwrap();
        let new = store.create_feature(feature(0)).await.unwrap();

        let ids: Vec<Uuid> = store
            .list_features()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec![new.id, old.id]);
    }

    #[tokio::test]
    async fn test_user_uniqueness() {
        let store = MemoryStore::new();
        store.create_user(user("user1", "u1@example.com")).await.unwrap();

        assert!(matches!(
            store.create_user(user("user1", "other@example.com")).await,
            Err(Error::UserExists)
        ));
        assert!(matches!(
            store.create_user(user("user2", "U1@Example.com")).await,
            Err(Error::UserExists)
        ));

        let found = store.find_user_by_username("user1").await.unwrap().unwrap();
        assert_eq!(found.email, "u1@example.com");
        assert!(store.find_user_by_username("nobody").await.unwrap().is_none());
    }
}
