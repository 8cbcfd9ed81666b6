//! Cache key builders and TTL policy.
//!
//! Every key in the store is built here so the invalidation routines and the
//! writers can never drift apart on formats.

use std::time::Duration;

use uuid::Uuid;

use crate::domain::posts::CommentSort;

pub const PROFILE_TTL: Duration = Duration::from_secs(3600);
pub const POST_COMMENTS_TTL: Duration = Duration::from_secs(60);
pub const FOLLOW_FLAG_TTL: Duration = Duration::from_secs(3600);
pub const NOTICE_LIMIT_TTL: Duration = Duration::from_secs(3600);
pub const TAXONOMY_TTL: Duration = Duration::from_secs(3600);

/// Profile aggregate as seen by anonymous viewers.
pub fn profile(user_id: Uuid) -> String {
    format!("profile:{user_id}")
}

/// Canonical user row mirror; refreshed together with [`profile`] on every
/// profile mutation.
pub fn user(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn post_comments_page(
    post_id: Uuid,
    page: u32,
    limit: u32,
    sort: CommentSort,
    viewer: Option<Uuid>,
) -> String {
    let viewer = viewer
        .map(|id| id.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    format!(
        "post_comments:{post_id}:{page}:{limit}:{}:{viewer}",
        sort.as_str()
    )
}

/// Pattern covering every cached page of one post's comments.
pub fn post_comments_pattern(post_id: Uuid) -> String {
    format!("post_comments:{post_id}:*")
}

pub fn follow_flag(follower_id: Uuid, followee_id: Uuid) -> String {
    format!("follow:{follower_id}:{followee_id}")
}

/// Throttle key for follow notifications, one per follower/followee pair.
pub fn follow_notice_limit(follower_id: Uuid, followee_id: Uuid) -> String {
    format!("follow_notice:{follower_id}:{followee_id}")
}

/// Throttle key for comment notifications, one per commenter/post pair.
pub fn comment_notice_limit(author_id: Uuid, post_id: Uuid) -> String {
    format!("comment_notice:{author_id}:{post_id}")
}

/// Throttle key for like notifications, one per liker/comment pair.
pub fn like_notice_limit(user_id: Uuid, comment_id: Uuid) -> String {
    format!("like_notice:{user_id}:{comment_id}")
}

pub fn tags_all() -> String {
    "tags:all".to_string()
}

pub fn categories_all() -> String {
    "categories:all".to_string()
}

pub const TAGS_PATTERN: &str = "tags:*";
pub const CATEGORIES_PATTERN: &str = "categories:*";

/// Channel the gateway publishes notification envelopes on.
pub const NOTIFICATIONS_CHANNEL: &str = "notifications";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_page_key_includes_viewer_scope() {
        let post = Uuid::nil();
        let anonymous = post_comments_page(post, 1, 10, CommentSort::Newest, None);
        assert_eq!(
            anonymous,
            format!("post_comments:{post}:1:10:newest:anonymous")
        );

        let viewer = Uuid::from_u128(7);
        let scoped = post_comments_page(post, 1, 10, CommentSort::Newest, Some(viewer));
        assert!(scoped.ends_with(&viewer.to_string()));
        assert_ne!(anonymous, scoped);
    }

    #[test]
    fn comment_pattern_covers_every_page_variant() {
        let post = Uuid::from_u128(42);
        let key = post_comments_page(post, 3, 25, CommentSort::Top, Some(Uuid::from_u128(9)));
        assert!(crate::cache::store::glob_match(
            &post_comments_pattern(post),
            &key
        ));
    }
}
