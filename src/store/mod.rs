//! Durable records: votes, features and users
//!
//! The vote store is the source of truth for every vote count. Its one hard
//! invariant is that at most one [`Vote`] exists per (user, feature) pair;
//! backends enforce it inside their own write path (a row lock or a single
//! mutex), never by a separate check-then-insert from the caller.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::common::retry::{retry, Retry};
use crate::common::Result;

/// One user's vote for one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub user_id: Uuid,
    pub feature_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(user_id: Uuid, feature_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            feature_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureStatus {
    #[default]
    Open,
    #[serde(rename = "Under Review")]
    UnderReview,
    Planned,
    Completed,
    Archived,
}

/// Feature metadata. The vote count is never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: FeatureStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` leaves the field as is
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<FeatureStatus>,
}

impl FeaturePatch {
    /// Apply to a feature, bumping `updated_at`
    pub fn apply(self, feature: &mut Feature) {
        if let Some(title) = self.title {
            feature.title = title;
        }
        if let Some(description) = self.description {
            feature.description = description;
        }
        if let Some(status) = self.status {
            feature.status = status;
        }
        feature.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Argon2 PHC string
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Durable vote records
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Persist a vote. Fails with `DuplicateVote` if the pair already voted
    /// and `FeatureNotFound` if the feature does not exist.
    async fn create_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<Vote>;

    /// Remove a vote. Fails with `VoteNotFound` if there is none.
    async fn delete_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<()>;

    /// Exact number of persisted votes for a feature
    async fn count_votes(&self, feature_id: Uuid) -> Result<u64>;

    async fn has_voted(&self, user_id: Uuid, feature_id: Uuid) -> Result<bool>;

    /// Remove every vote of a feature, returning how many were removed
    async fn delete_feature_cascade(&self, feature_id: Uuid) -> Result<u64>;
}

/// Feature metadata records
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn create_feature(&self, feature: Feature) -> Result<Feature>;

    async fn get_feature(&self, id: Uuid) -> Result<Option<Feature>>;

    /// All features, newest first
    async fn list_features(&self) -> Result<Vec<Feature>>;

    async fn update_feature(&self, id: Uuid, patch: FeaturePatch) -> Result<Feature>;

    /// Remove a feature together with its votes in one atomic step.
    /// Returns the number of votes removed.
    async fn delete_feature(&self, id: Uuid) -> Result<u64>;
}

/// Registered accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user; fails with `UserExists` on a taken username or email
    async fn create_user(&self, user: User) -> Result<User>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
}

/// Email uniqueness ignores case
pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl<S: VoteStore + ?Sized> VoteStore for Retry<Arc<S>> {
    async fn create_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<Vote> {
        retry(&self.policy, "create_vote", || {
            self.inner.create_vote(user_id, feature_id)
        })
        .await
    }

    async fn delete_vote(&self, user_id: Uuid, feature_id: Uuid) -> Result<()> {
        retry(&self.policy, "delete_vote", || {
            self.inner.delete_vote(user_id, feature_id)
        })
        .await
    }

    async fn count_votes(&self, feature_id: Uuid) -> Result<u64> {
        retry(&self.policy, "count_votes", || self.inner.count_votes(feature_id)).await
    }

    async fn has_voted(&self, user_id: Uuid, feature_id: Uuid) -> Result<bool> {
        retry(&self.policy, "has_voted", || {
            self.inner.has_voted(user_id, feature_id)
        })
        .await
    }

    async fn delete_feature_cascade(&self, feature_id: Uuid) -> Result<u64> {
        retry(&self.policy, "delete_feature_cascade", || {
            self.inner.delete_feature_cascade(feature_id)
        })
        .await
    }
}
