//! Comment reads and mutations.
//!
//! Listing pages are cached per post/page/sort/viewer with a short TTL. A new
//! comment drops every cached page of its post before the caller gets its
//! response; likes, edits and deletions invalidate best-effort because brief
//! staleness there is acceptable.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::jobs::notify::JOB_DELIVER_NOTIFICATION;
use crate::application::jobs::{JobQueues, QueuePolicy};
use crate::application::repos::{CommentPage, CommentsRepo, NewComment, UsersRepo};
use crate::cache::store::KeyValueStore;
use crate::cache::{CacheAside, InvalidationRouter, keys};
use crate::domain::notifications::{NewNotification, NotificationType};
use crate::domain::posts::{CommentRecord, CommentView};

pub struct CommentService {
    cache: Arc<CacheAside>,
    invalidation: Arc<InvalidationRouter>,
    comments: Arc<dyn CommentsRepo>,
    users: Arc<dyn UsersRepo>,
    queues: Arc<JobQueues>,
    policy: QueuePolicy,
}

impl CommentService {
    pub fn new(
        cache: Arc<CacheAside>,
        invalidation: Arc<InvalidationRouter>,
        comments: Arc<dyn CommentsRepo>,
        users: Arc<dyn UsersRepo>,
        queues: Arc<JobQueues>,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            cache,
            invalidation,
            comments,
            users,
            queues,
            policy,
        }
    }

    pub async fn add_comment(
        &self,
        author_id: Uuid,
        post_id: Uuid,
        body: String,
        parent_id: Option<Uuid>,
    ) -> Result<CommentRecord, AppError> {
        if body.trim().is_empty() {
            return Err(AppError::validation("comment body must not be empty"));
        }
        let Some(post) = self.comments.find_post(post_id).await? else {
            return Err(AppError::NotFound);
        };

        let comment = self
            .comments
            .create_comment(NewComment {
                post_id,
                author_id,
                body,
                parent_id,
            })
            .await?;

        // Awaited so the author's next page load includes their comment.
        self.invalidation.drop_post_comments(post_id).await?;

        if post.author_id != author_id {
            if let Err(err) = self
                .queue_comment_notice(author_id, post.author_id, post_id, &post.title)
                .await
            {
                warn!(%post_id, error = %err, "comment notification enqueue failed");
            }
        }
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        post_id: Uuid,
        page: CommentPage,
        viewer: Option<Uuid>,
    ) -> Result<Vec<CommentView>, AppError> {
        if self.comments.find_post(post_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        let key = keys::post_comments_page(post_id, page.page, page.limit, page.sort, viewer);
        self.cache
            .get_or_compute(&key, Some(keys::POST_COMMENTS_TTL), false, || async {
                self.comments
                    .list_comments(post_id, page, viewer)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }

    /// Flip the viewer's like; returns the new liked state.
    pub async fn toggle_like(&self, comment_id: Uuid, user_id: Uuid) -> Result<bool, AppError> {
        let Some(comment) = self.comments.find_comment(comment_id).await? else {
            return Err(AppError::NotFound);
        };
        let liked = self.comments.toggle_comment_like(comment_id, user_id).await?;
        self.invalidation
            .drop_post_comments_best_effort(comment.post_id);

        // Unlikes never notify.
        if liked && comment.author_id != user_id {
            if let Err(err) = self.queue_like_notice(user_id, &comment).await {
                warn!(%comment_id, error = %err, "like notification enqueue failed");
            }
        }
        Ok(liked)
    }

    pub async fn update_comment(
        &self,
        comment_id: Uuid,
        user_id: Uuid,
        body: String,
    ) -> Result<CommentRecord, AppError> {
        if body.trim().is_empty() {
            return Err(AppError::validation("comment body must not be empty"));
        }
        let Some(comment) = self.comments.find_comment(comment_id).await? else {
            return Err(AppError::NotFound);
        };
        if comment.author_id != user_id {
            return Err(AppError::Unauthorized);
        }
        let updated = self.comments.update_comment(comment_id, body).await?;
        self.invalidation
            .drop_post_comments_best_effort(comment.post_id);
        Ok(updated)
    }

    pub async fn delete_comment(&self, comment_id: Uuid, user_id: Uuid) -> Result<(), AppError> {
        let Some(comment) = self.comments.find_comment(comment_id).await? else {
            return Err(AppError::NotFound);
        };
        if comment.author_id != user_id {
            return Err(AppError::Unauthorized);
        }
        self.comments.delete_comment(comment_id).await?;
        self.invalidation
            .drop_post_comments_best_effort(comment.post_id);
        Ok(())
    }

    /// One notification per commenter/post pair per throttle window.
    async fn queue_comment_notice(
        &self,
        commenter: Uuid,
        post_author: Uuid,
        post_id: Uuid,
        post_title: &str,
    ) -> Result<(), AppError> {
        let notice_key = keys::comment_notice_limit(commenter, post_id);
        if self.store().get_raw(&notice_key).await?.is_some() {
            return Ok(());
        }

        let commenter_name = self
            .users
            .find_user(commenter)
            .await?
            .map(|user| user.username)
            .unwrap_or_else(|| "someone".to_string());

        let notification = NewNotification {
            kind: NotificationType::Comment,
            user_id: post_author,
            message: format!("{commenter_name} commented on \"{post_title}\""),
            link: Some(format!("/posts/{post_id}")),
            image_url: None,
            metadata: serde_json::json!({ "postId": post_id, "commenterId": commenter }),
        };
        self.queues
            .notifications
            .enqueue(JOB_DELIVER_NOTIFICATION, &notification, self.policy.options())
            .map_err(AppError::from)?;

        self.store()
            .set_raw(&notice_key, "1", Some(keys::NOTICE_LIMIT_TTL))
            .await?;
        Ok(())
    }

    /// One notification per liker/comment pair per throttle window, so a
    /// like/unlike/like loop cannot spam the author.
    async fn queue_like_notice(
        &self,
        liker: Uuid,
        comment: &CommentRecord,
    ) -> Result<(), AppError> {
        let notice_key = keys::like_notice_limit(liker, comment.id);
        if self.store().get_raw(&notice_key).await?.is_some() {
            return Ok(());
        }

        let liker_name = self
            .users
            .find_user(liker)
            .await?
            .map(|user| user.username)
            .unwrap_or_else(|| "someone".to_string());

        let notification = NewNotification {
            kind: NotificationType::Like,
            user_id: comment.author_id,
            message: format!("{liker_name} liked your comment"),
            link: Some(format!("/posts/{}", comment.post_id)),
            image_url: None,
            metadata: serde_json::json!({ "commentId": comment.id, "likerId": liker }),
        };
        self.queues
            .notifications
            .enqueue(JOB_DELIVER_NOTIFICATION, &notification, self.policy.options())
            .map_err(AppError::from)?;

        self.store()
            .set_raw(&notice_key, "1", Some(keys::NOTICE_LIMIT_TTL))
            .await?;
        Ok(())
    }

    fn store(&self) -> &Arc<dyn KeyValueStore> {
        self.cache.store()
    }
}
