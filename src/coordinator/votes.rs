//! Vote coordinator
//!
//! Sequences every vote mutation across the durable [`VoteStore`] and the
//! [`CountCache`].
//!
//! Ordering invariant: the durable store is always mutated first and the
//! cache second, never the reverse. If the process dies between the two
//! steps the cache is merely stale, and the next miss (or TTL expiry)
//! repairs it from the store. The reverse order could leave the cache
//! counting a vote that never committed.
//!
//! Cache effects are best-effort. A cache failure after a committed write is
//! logged and answered with an invalidation; it never fails the operation.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::CountCache;
use crate::common::{Error, MetricsRegistry, Result};
use crate::store::{Vote, VoteStore};

#[derive(Debug, Clone, Copy)]
enum Delta {
    Up,
    Down,
}

pub struct VoteCoordinator {
    store: Arc<dyn VoteStore>,
    cache: Arc<dyn CountCache>,
    ttl: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl VoteCoordinator {
    pub fn new(
        store: Arc<dyn VoteStore>,
        cache: Arc<dyn CountCache>,
        ttl: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            cache,
            ttl,
            metrics,
        }
    }

    /// Record a vote, then bump the cached count if one is cached.
    ///
    /// A duplicate is reported as `AlreadyVoted` and leaves the cache alone:
    /// it already reflects the earlier vote.
    pub async fn upvote(&self, user_id: Uuid, feature_id: Uuid) -> Result<Vote> {
        let vote = match self.store.create_vote(user_id, feature_id).await {
            Ok(vote) => vote,
            Err(Error::DuplicateVote { .. }) => {
                self.metrics.duplicate_votes.inc();
                tracing::debug!(user = %user_id, feature = %feature_id, "duplicate upvote rejected");
                return Err(Error::AlreadyVoted);
            }
            Err(e) => return Err(e),
        };

        self.metrics.upvotes.inc();
        self.apply_delta(feature_id, Delta::Up).await;
        Ok(vote)
    }

    /// Remove a vote, then drop the cached count by one if one is cached
    pub async fn unvote(&self, user_id: Uuid, feature_id: Uuid) -> Result<()> {
        match self.store.delete_vote(user_id, feature_id).await {
            Ok(()) => {}
            Err(Error::VoteNotFound { .. }) => {
                self.metrics.missing_votes.inc();
                tracing::debug!(user = %user_id, feature = %feature_id, "unvote without vote rejected");
                return Err(Error::NotVoted);
            }
            Err(e) => return Err(e),
        }

        self.metrics.unvotes.inc();
        self.apply_delta(feature_id, Delta::Down).await;
        Ok(())
    }

    /// Cached count, recomputed from the store on a miss.
    ///
    /// Concurrent misses may each recompute and `set`; the last writer wins.
    /// A repopulate that read the store before a concurrent vote committed
    /// can overwrite that vote's increment, so the entry may drift until the
    /// TTL expires. A failing cache degrades to a store read.
    pub async fn read_count(&self, feature_id: Uuid) -> Result<u64> {
        match self.cache.get(feature_id).await {
            Ok(Some(count)) => {
                self.metrics.cache_hits.inc();
                return Ok(count);
            }
            Ok(None) => {
                self.metrics.cache_misses.inc();
                tracing::debug!(feature = %feature_id, "vote count cache miss");
            }
            Err(e) => {
                self.metrics.cache_errors.inc();
                tracing::warn!(feature = %feature_id, error = %e, "cache read failed, counting from store");
            }
        }

        let count = self.store.count_votes(feature_id).await?;

        if let Err(e) = self.cache.set(feature_id, count, self.ttl).await {
            self.metrics.cache_errors.inc();
            tracing::warn!(feature = %feature_id, error = %e, "failed to repopulate vote count");
        }
        Ok(count)
    }

    pub async fn has_voted(&self, user_id: Uuid, feature_id: Uuid) -> Result<bool> {
        self.store.has_voted(user_id, feature_id).await
    }

    /// Drop the cached count of a feature whose votes were just removed
    /// durably (feature deletion).
    pub async fn feature_removed(&self, feature_id: Uuid) {
        self.invalidate(feature_id).await;
    }

    async fn apply_delta(&self, feature_id: Uuid, delta: Delta) {
        let result = match delta {
            Delta::Up => self.cache.increment(feature_id).await,
            Delta::Down => self.cache.decrement(feature_id).await,
        };
        match result {
            Ok(Some(count)) => {
                tracing::debug!(feature = %feature_id, ?delta, count, "vote count cache updated");
            }
            // Absent keys stay absent; the next read recomputes
            Ok(None) => {}
            Err(e) => {
                self.metrics.cache_errors.inc();
                tracing::warn!(
                    feature = %feature_id,
                    ?delta,
                    error = %e,
                    "cache delta failed after commit, invalidating"
                );
                self.invalidate(feature_id).await;
            }
        }
    }

    async fn invalidate(&self, feature_id: Uuid) {
        if let Err(e) = self.cache.delete(feature_id).await {
            self.metrics.cache_errors.inc();
            tracing::warn!(
                feature = %feature_id,
                error = %e,
                "cache invalidation failed, entry stays until TTL"
            );
        }
    }
}
