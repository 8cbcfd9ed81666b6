//! Invalidation router.
//!
//! Every mutation that can leave the cache stale goes through one of these
//! routines. Each is idempotent; running it twice leaves the same state as
//! running it once.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::{ProfilesRepo, RepoError, UsersRepo};
use crate::domain::users::ProfileAggregate;

use super::keys;
use super::store::{self, BatchOp, KeyValueStore, StoreError};

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Direction of a follow-graph mutation, used to pick the counter deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDelta {
    Followed,
    Unfollowed,
}

pub struct InvalidationRouter {
    store: Arc<dyn KeyValueStore>,
    users: Arc<dyn UsersRepo>,
    profiles: Arc<dyn ProfilesRepo>,
}

impl InvalidationRouter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn UsersRepo>,
        profiles: Arc<dyn ProfilesRepo>,
    ) -> Self {
        Self {
            store,
            users,
            profiles,
        }
    }

    /// Drop every cached comment page of a post, across all pagination, sort
    /// and viewer variants. Returns how many entries were removed.
    pub async fn drop_post_comments(&self, post_id: Uuid) -> Result<u64, StoreError> {
        let keys = self
            .store
            .scan_keys(&keys::post_comments_pattern(post_id))
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_many(&keys).await?;
        counter!("devhub_cache_invalidate_total").increment(removed);
        debug!(%post_id, removed, "dropped cached comment pages");
        Ok(removed)
    }

    /// Fire-and-forget variant for paths where comment staleness is tolerable
    /// (likes, edits, deletions). Failures are logged, never surfaced.
    pub fn drop_post_comments_best_effort(self: &Arc<Self>, post_id: Uuid) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = router.drop_post_comments(post_id).await {
                warn!(%post_id, error = %err, "best-effort comment invalidation failed");
            }
        });
    }

    /// Read-through refresh after a profile mutation: drop the `user:` and
    /// `profile:` mirrors, reload both from the primary store, and repopulate
    /// them in one batch. Callers await this before acknowledging the
    /// mutation so a follow-up read cannot observe the pre-update value.
    pub async fn refresh_profile(&self, user_id: Uuid) -> Result<(), InvalidationError> {
        let profile_key = keys::profile(user_id);
        let user_key = keys::user(user_id);
        self.store
            .delete_many(&[profile_key.clone(), user_key.clone()])
            .await?;
        counter!("devhub_cache_invalidate_total").increment(2);

        let (Some(profile), Some(user)) = (
            self.profiles.load_profile(user_id, None).await?,
            self.users.find_user(user_id).await?,
        ) else {
            // User gone between mutation and refresh; the deletes are enough.
            return Ok(());
        };
        self.store
            .apply_batch(vec![
                BatchOp::Set {
                    key: profile_key,
                    value: serde_json::to_string(&profile).map_err(StoreError::from)?,
                    ttl: Some(keys::PROFILE_TTL),
                },
                BatchOp::Set {
                    key: user_key,
                    value: serde_json::to_string(&user).map_err(StoreError::from)?,
                    ttl: Some(keys::PROFILE_TTL),
                },
            ])
            .await?;
        debug!(%user_id, "refreshed cached profile");
        Ok(())
    }

    /// Rewrite the cached counters on both sides of a follow mutation in one
    /// atomic batch, together with the follow flag. Counters floor at zero;
    /// absent cache entries are left absent rather than fabricated.
    pub async fn apply_follow_delta(
        &self,
        follower: Uuid,
        followee: Uuid,
        delta: FollowDelta,
    ) -> Result<(), StoreError> {
        let mut ops = Vec::with_capacity(3);

        // Both states are cached so a read after unfollow does not have to
        // fall through to the primary store.
        ops.push(BatchOp::Set {
            key: keys::follow_flag(follower, followee),
            value: match delta {
                FollowDelta::Followed => "1".to_string(),
                FollowDelta::Unfollowed => "0".to_string(),
            },
            ttl: Some(keys::FOLLOW_FLAG_TTL),
        });

        let follower_key = keys::profile(follower);
        if let Some(mut profile) =
            store::get_json::<_, ProfileAggregate>(self.store.as_ref(), &follower_key).await?
        {
            profile.following_count = match delta {
                FollowDelta::Followed => profile.following_count + 1,
                FollowDelta::Unfollowed => profile.following_count.saturating_sub(1),
            };
            ops.push(BatchOp::Set {
                key: follower_key,
                value: serde_json::to_string(&profile)?,
                ttl: Some(keys::PROFILE_TTL),
            });
        }

        let followee_key = keys::profile(followee);
        if let Some(mut profile) =
            store::get_json::<_, ProfileAggregate>(self.store.as_ref(), &followee_key).await?
        {
            profile.followers_count = match delta {
                FollowDelta::Followed => profile.followers_count + 1,
                FollowDelta::Unfollowed => profile.followers_count.saturating_sub(1),
            };
            profile.is_following = delta == FollowDelta::Followed;
            ops.push(BatchOp::Set {
                key: followee_key,
                value: serde_json::to_string(&profile)?,
                ttl: Some(keys::PROFILE_TTL),
            });
        }

        self.store.apply_batch(ops).await?;
        counter!("devhub_cache_invalidate_total").increment(1);
        debug!(%follower, %followee, ?delta, "applied follow delta to cached profiles");
        Ok(())
    }

    /// Drop the cached tag and category listings after a taxonomy mutation.
    pub async fn drop_taxonomy(&self) -> Result<u64, StoreError> {
        let mut keys = self.store.scan_keys(keys::TAGS_PATTERN).await?;
        keys.extend(self.store.scan_keys(keys::CATEGORIES_PATTERN).await?);
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_many(&keys).await?;
        counter!("devhub_cache_invalidate_total").increment(removed);
        Ok(removed)
    }
}
