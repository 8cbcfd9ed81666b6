//! Follow graph mutations.
//!
//! The primary-store write happens first; the cached counter rewrite is
//! awaited before returning so the caller's next profile read reflects the
//! change. The follow notification is a queued side-effect, throttled to one
//! per follower/followee pair per hour.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::jobs::notify::JOB_DELIVER_NOTIFICATION;
use crate::application::jobs::{JobQueues, QueuePolicy};
use crate::application::repos::{FollowsRepo, RepoError, UsersRepo};
use crate::cache::invalidation::FollowDelta;
use crate::cache::store::KeyValueStore;
use crate::cache::{InvalidationRouter, keys};
use crate::domain::notifications::{NewNotification, NotificationType};
use crate::domain::users::UserRecord;

pub struct FollowService {
    store: Arc<dyn KeyValueStore>,
    invalidation: Arc<InvalidationRouter>,
    users: Arc<dyn UsersRepo>,
    follows: Arc<dyn FollowsRepo>,
    queues: Arc<JobQueues>,
    policy: QueuePolicy,
}

impl FollowService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        invalidation: Arc<InvalidationRouter>,
        users: Arc<dyn UsersRepo>,
        follows: Arc<dyn FollowsRepo>,
        queues: Arc<JobQueues>,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            store,
            invalidation,
            users,
            follows,
            queues,
            policy,
        }
    }

    pub async fn follow(&self, follower: Uuid, followee: Uuid) -> Result<(), AppError> {
        if follower == followee {
            return Err(AppError::validation("cannot follow yourself"));
        }
        if self.users.find_user(followee).await?.is_none() {
            return Err(AppError::NotFound);
        }

        match self.follows.create_follow(follower, followee).await {
            Ok(()) => {}
            Err(RepoError::Duplicate { .. }) => {
                return Err(AppError::conflict("already following"));
            }
            Err(err) => return Err(err.into()),
        }

        self.invalidation
            .apply_follow_delta(follower, followee, FollowDelta::Followed)
            .await?;

        if let Err(err) = self.queue_follow_notice(follower, followee).await {
            warn!(%follower, %followee, error = %err, "follow notification enqueue failed");
        }
        Ok(())
    }

    pub async fn unfollow(&self, follower: Uuid, followee: Uuid) -> Result<(), AppError> {
        if follower == followee {
            return Err(AppError::validation("cannot unfollow yourself"));
        }
        match self.follows.delete_follow(follower, followee).await {
            Ok(()) => {}
            Err(RepoError::NotFound) => return Err(AppError::NotFound),
            Err(err) => return Err(err.into()),
        }

        self.invalidation
            .apply_follow_delta(follower, followee, FollowDelta::Unfollowed)
            .await?;
        Ok(())
    }

    /// Whether `follower` currently follows `followee`, resolved through the
    /// cached follow flag with a primary-store fallback.
    pub async fn following_status(&self, follower: Uuid, followee: Uuid) -> Result<bool, AppError> {
        let flag_key = keys::follow_flag(follower, followee);
        if let Some(flag) = self.store.get_raw(&flag_key).await? {
            return Ok(flag == "1");
        }
        let following = self.follows.is_following(follower, followee).await?;
        self.store
            .set_raw(
                &flag_key,
                if following { "1" } else { "0" },
                Some(keys::FOLLOW_FLAG_TTL),
            )
            .await?;
        Ok(following)
    }

    /// Listings read straight from the primary store; the graph is too
    /// write-heavy for page caching to pay off.
    pub async fn followers(&self, user_id: Uuid) -> Result<Vec<UserRecord>, AppError> {
        if self.users.find_user(user_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        Ok(self.follows.list_followers(user_id).await?)
    }

    pub async fn following(&self, user_id: Uuid) -> Result<Vec<UserRecord>, AppError> {
        if self.users.find_user(user_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        Ok(self.follows.list_following(user_id).await?)
    }

    /// Enqueue the "started following you" notification unless one was sent
    /// for this pair within the throttle window.
    async fn queue_follow_notice(&self, follower: Uuid, followee: Uuid) -> Result<(), AppError> {
        let notice_key = keys::follow_notice_limit(follower, followee);
        if self.store.get_raw(&notice_key).await?.is_some() {
            return Ok(());
        }

        let follower_name = self
            .users
            .find_user(follower)
            .await?
            .map(|user| user.username)
            .unwrap_or_else(|| "someone".to_string());

        let notification = NewNotification {
            kind: NotificationType::Follow,
            user_id: followee,
            message: format!("{follower_name} started following you"),
            link: Some(format!("/profile/{follower}")),
            image_url: None,
            metadata: serde_json::json!({ "followerId": follower }),
        };
        self.queues
            .notifications
            .enqueue(JOB_DELIVER_NOTIFICATION, &notification, self.policy.options())
            .map_err(AppError::from)?;

        self.store
            .set_raw(&notice_key, "1", Some(keys::NOTICE_LIMIT_TTL))
            .await?;
        Ok(())
    }
}
