//! Feature registry
//!
//! Feature CRUD on top of the [`FeatureStore`], composed with the
//! [`VoteCoordinator`] for everything vote related. Read views carry the
//! `vote_count` from the count cache and a per-viewer `has_voted` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::accounts::UserView;
use super::votes::VoteCoordinator;
use crate::common::auth::AuthContext;
use crate::common::{Error, Result};
use crate::store::{Feature, FeaturePatch, FeatureStatus, FeatureStore, User, UserStore};

pub const MAX_TITLE_LEN: usize = 255;

/// Body of a feature creation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewFeature {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<FeatureStatus>,
}

/// Feature as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: FeatureStatus,
    /// `None` if the author's account no longer resolves
    pub created_by: Option<UserView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub vote_count: u64,
    pub has_voted: bool,
}

/// Vote as returned by an upvote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteView {
    pub id: Uuid,
    pub user: UserView,
    pub feature: FeatureView,
    pub created_at: DateTime<Utc>,
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("title: This field may not be blank.".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::Validation(format!(
            "title: Ensure this field has no more than {} characters.",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

pub struct FeatureRegistry {
    features: Arc<dyn FeatureStore>,
    users: Arc<dyn UserStore>,
    votes: Arc<VoteCoordinator>,
}

impl FeatureRegistry {
    pub fn new(
        features: Arc<dyn FeatureStore>,
        users: Arc<dyn UserStore>,
        votes: Arc<VoteCoordinator>,
    ) -> Self {
        Self {
            features,
            users,
            votes,
        }
    }

    pub fn votes(&self) -> &VoteCoordinator {
        &self.votes
    }

    pub async fn create(&self, author: &AuthContext, input: NewFeature) -> Result<FeatureView> {
        validate_title(&input.title)?;
        let now = Utc::now();
        let feature = Feature {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description,
            status: input.status.unwrap_or_default(),
            created_by: author.user_id,
            created_at: now,
            updated_at: now,
        };
        let feature = self.features.create_feature(feature).await?;
        tracing::info!(feature = %feature.id, author = %author.username, "feature created");
        self.view(feature, Some(author.user_id)).await
    }

    pub async fn get(&self, id: Uuid, viewer: Option<Uuid>) -> Result<FeatureView> {
        let feature = self.require(id).await?;
        self.view(feature, viewer).await
    }

    /// Every feature, newest first
    pub async fn list(&self, viewer: Option<Uuid>) -> Result<Vec<FeatureView>> {
        let features = self.features.list_features().await?;
        let mut views = Vec::with_capacity(features.len());
        for feature in features {
            views.push(self.view(feature, viewer).await?);
        }
        Ok(views)
    }

    pub async fn update(
        &self,
        id: Uuid,
        patch: FeaturePatch,
        editor: &AuthContext,
    ) -> Result<FeatureView> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        let feature = self.features.update_feature(id, patch).await?;
        tracing::info!(feature = %id, editor = %editor.username, "feature updated");
        self.view(feature, Some(editor.user_id)).await
    }

    /// Delete a feature and its votes, then drop its cached count
    pub async fn delete(&self, id: Uuid, editor: &AuthContext) -> Result<()> {
        let removed = self.features.delete_feature(id).await?;
        self.votes.feature_removed(id).await;
        tracing::info!(feature = %id, editor = %editor.username, votes_removed = removed, "feature deleted");
        Ok(())
    }

    /// Record an upvote and describe it.
    ///
    /// The voter and the feature are resolved before the vote commits, so
    /// after the commit only the count read can still fail.
    pub async fn upvote(&self, voter: &AuthContext, feature_id: Uuid) -> Result<VoteView> {
        let user = self.author(voter.user_id).await?.ok_or(Error::UserNotFound)?;
        let feature = self.require(feature_id).await?;
        let created_by = self.author(feature.created_by).await?.map(UserView::from);

        let vote = self.votes.upvote(voter.user_id, feature_id).await?;

        let vote_count = self.votes.read_count(feature_id).await?;
        Ok(VoteView {
            id: vote.id,
            user: UserView::from(user),
            feature: feature_view(feature, created_by, vote_count, true),
            created_at: vote.created_at,
        })
    }

    /// Unknown features are reported as not found before any vote lookup
    pub async fn unvote(&self, voter: &AuthContext, feature_id: Uuid) -> Result<()> {
        self.require(feature_id).await?;
        self.votes.unvote(voter.user_id, feature_id).await
    }

    async fn require(&self, id: Uuid) -> Result<Feature> {
        self.features
            .get_feature(id)
            .await?
            .ok_or(Error::FeatureNotFound(id))
    }

    async fn author(&self, id: Uuid) -> Result<Option<User>> {
        self.users.get_user(id).await
    }

    async fn view(&self, feature: Feature, viewer: Option<Uuid>) -> Result<FeatureView> {
        let vote_count = self.votes.read_count(feature.id).await?;
        let has_voted = match viewer {
            Some(user_id) => self.votes.has_voted(user_id, feature.id).await?,
            None => false,
        };
        let created_by = self.author(feature.created_by).await?.map(UserView::from);
        Ok(feature_view(feature, created_by, vote_count, has_voted))
    }
}

fn feature_view(
    feature: Feature,
    created_by: Option<UserView>,
    vote_count: u64,
    has_voted: bool,
) -> FeatureView {
    FeatureView {
        id: feature.id,
        title: feature.title,
        description: feature.description,
        status: feature.status,
        created_by,
        created_at: feature.created_at,
        updated_at: feature.updated_at,
        vote_count,
        has_voted,
    }
}
