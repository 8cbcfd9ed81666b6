//! Repository traits describing the primary store adapters.
//!
//! The cache layer and services are written against these traits; the
//! in-memory reference adapters live in [`crate::infra::memory`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::notifications::{NewNotification, NotificationRecord};
use crate::domain::posts::{
    CategoryRecord, CommentRecord, CommentSort, CommentView, PostRecord, TagRecord,
};
use crate::domain::users::{OAuthIdentity, ProfileAggregate, ProfileUpdate, UserRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn duplicate(constraint: impl Into<String>) -> Self {
        Self::Duplicate {
            constraint: constraint.into(),
        }
    }
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError>;

    async fn is_username_taken(&self, username: &str, exclude: Option<Uuid>)
    -> Result<bool, RepoError>;

    /// Find the user matching an upstream identity by email, creating one if
    /// absent, and refresh the mirrored provider fields either way.
    async fn upsert_oauth_user(&self, identity: &OAuthIdentity) -> Result<UserRecord, RepoError>;
}

#[async_trait]
pub trait ProfilesRepo: Send + Sync {
    /// Load the denormalized profile view, counters included.
    async fn load_profile(
        &self,
        user_id: Uuid,
        viewer: Option<Uuid>,
    ) -> Result<Option<ProfileAggregate>, RepoError>;

    /// Apply a profile edit as one atomic unit against the primary store.
    async fn update_profile_atomic(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<UserRecord, RepoError>;
}

#[async_trait]
pub trait FollowsRepo: Send + Sync {
    /// Errors with [`RepoError::Duplicate`] if the edge already exists.
    async fn create_follow(&self, follower: Uuid, followee: Uuid) -> Result<(), RepoError>;

    /// Errors with [`RepoError::NotFound`] if the edge does not exist.
    async fn delete_follow(&self, follower: Uuid, followee: Uuid) -> Result<(), RepoError>;

    async fn is_following(&self, follower: Uuid, followee: Uuid) -> Result<bool, RepoError>;

    /// Users who follow `user_id`, ordered by username.
    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<UserRecord>, RepoError>;

    /// Users whom `user_id` follows, ordered by username.
    async fn list_following(&self, user_id: Uuid) -> Result<Vec<UserRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct CommentPage {
    pub page: u32,
    pub limit: u32,
    pub sort: CommentSort,
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    async fn find_post(&self, post_id: Uuid) -> Result<Option<PostRecord>, RepoError>;

    async fn create_comment(&self, comment: NewComment) -> Result<CommentRecord, RepoError>;

    async fn find_comment(&self, comment_id: Uuid) -> Result<Option<CommentRecord>, RepoError>;

    async fn list_comments(
        &self,
        post_id: Uuid,
        page: CommentPage,
        viewer: Option<Uuid>,
    ) -> Result<Vec<CommentView>, RepoError>;

    /// Flip the viewer's like on a comment, returning the new state.
    async fn toggle_comment_like(
        &self,
        comment_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, RepoError>;

    async fn update_comment(&self, comment_id: Uuid, body: String)
    -> Result<CommentRecord, RepoError>;

    async fn delete_comment(&self, comment_id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait NotificationsRepo: Send + Sync {
    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepoError>;

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, RepoError>;

    async fn unread_count(&self, user_id: Uuid) -> Result<u64, RepoError>;

    /// Returns how many notifications were flipped to read.
    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait TaxonomyRepo: Send + Sync {
    async fn list_tags(&self) -> Result<Vec<TagRecord>, RepoError>;

    async fn list_categories(&self) -> Result<Vec<CategoryRecord>, RepoError>;

    async fn create_tag(&self, name: String) -> Result<TagRecord, RepoError>;

    async fn create_category(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<CategoryRecord, RepoError>;
}
