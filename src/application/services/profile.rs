//! Profile reads and edits.
//!
//! Reads go cache-aside against the `profile:` mirror; edits run as one
//! atomic unit against the primary store and then refresh the mirror before
//! the caller gets its response, so a follow-up read observes the new value.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::{FollowsRepo, ProfilesRepo, UsersRepo};
use crate::cache::{CacheAside, InvalidationRouter, keys};
use crate::domain::users::{ProfileAggregate, ProfileUpdate, UserRecord};

pub struct ProfileService {
    cache: Arc<CacheAside>,
    invalidation: Arc<InvalidationRouter>,
    users: Arc<dyn UsersRepo>,
    profiles: Arc<dyn ProfilesRepo>,
    follows: Arc<dyn FollowsRepo>,
}

impl ProfileService {
    pub fn new(
        cache: Arc<CacheAside>,
        invalidation: Arc<InvalidationRouter>,
        users: Arc<dyn UsersRepo>,
        profiles: Arc<dyn ProfilesRepo>,
        follows: Arc<dyn FollowsRepo>,
    ) -> Self {
        Self {
            cache,
            invalidation,
            users,
            profiles,
            follows,
        }
    }

    /// Fetch a profile. The anonymous aggregate is shared across viewers;
    /// the per-viewer `is_following` bit is resolved separately through the
    /// cached follow flag.
    pub async fn get_profile(
        &self,
        user_id: Uuid,
        viewer: Option<Uuid>,
    ) -> Result<ProfileAggregate, AppError> {
        let mut profile = self
            .cache
            .get_or_compute(
                &keys::profile(user_id),
                Some(keys::PROFILE_TTL),
                false,
                || async {
                    self.profiles
                        .load_profile(user_id, None)
                        .await?
                        .ok_or(AppError::NotFound)
                },
            )
            .await?;

        if let Some(viewer) = viewer.filter(|viewer| *viewer != user_id) {
            profile.is_following = self.viewer_follows(viewer, user_id).await?;
        } else {
            profile.is_following = false;
        }
        Ok(profile)
    }

    /// Fetch the canonical user row through the `user:` mirror.
    pub async fn get_user(&self, user_id: Uuid) -> Result<UserRecord, AppError> {
        self.cache
            .get_or_compute(
                &keys::user(user_id),
                Some(keys::PROFILE_TTL),
                false,
                || async { self.users.find_user(user_id).await?.ok_or(AppError::NotFound) },
            )
            .await
    }

    async fn viewer_follows(&self, viewer: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let flag_key = keys::follow_flag(viewer, user_id);
        if let Some(flag) = self.cache.store().get_raw(&flag_key).await? {
            return Ok(flag == "1");
        }
        let following = self.follows.is_following(viewer, user_id).await?;
        self.cache
            .store()
            .set_raw(
                &flag_key,
                if following { "1" } else { "0" },
                Some(keys::FOLLOW_FLAG_TTL),
            )
            .await?;
        Ok(following)
    }

    /// Apply a profile edit and refresh the cached mirror before returning.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<ProfileAggregate, AppError> {
        if update.is_empty() {
            return Err(AppError::validation("no fields to update"));
        }
        if let Some(username) = &update.username {
            if username.trim().is_empty() {
                return Err(AppError::validation("username must not be blank"));
            }
            if self
                .users
                .is_username_taken(username, Some(user_id))
                .await?
            {
                return Err(AppError::conflict(format!(
                    "username `{username}` is taken"
                )));
            }
        }

        self.profiles.update_profile_atomic(user_id, &update).await?;
        self.invalidation.refresh_profile(user_id).await?;

        self.profiles
            .load_profile(user_id, None)
            .await?
            .ok_or(AppError::NotFound)
    }
}
