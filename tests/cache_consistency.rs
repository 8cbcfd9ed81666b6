//! End-to-end cache consistency across the service layer.
//!
//! Each test wires the real services against the in-process store and the
//! in-memory primary store, mutates through the service API, and asserts the
//! next read observes the new state.

use std::sync::Arc;
use std::time::Duration;

use devhub::application::error::AppError;
use devhub::application::jobs::{JobQueues, QueuePolicy};
use devhub::application::repos::CommentPage;
use devhub::application::services::{
    CommentService, FollowService, ProfileService, TaxonomyService,
};
use devhub::cache::{CacheAside, InvalidationRouter, KeyValueStore, MemoryStore};
use devhub::cache::keys;
use devhub::domain::posts::CommentSort;
use devhub::domain::users::ProfileUpdate;
use devhub::infra::memory::MemoryRepositories;

struct Harness {
    store: Arc<MemoryStore>,
    repos: Arc<MemoryRepositories>,
    profiles: ProfileService,
    follows: FollowService,
    comments: CommentService,
    taxonomy: TaxonomyService,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let kv: Arc<dyn KeyValueStore> = store.clone();
    let repos = Arc::new(MemoryRepositories::new());
    let cache = Arc::new(CacheAside::new(Arc::clone(&kv), Duration::from_secs(3600)));
    let invalidation = Arc::new(InvalidationRouter::new(
        Arc::clone(&kv),
        repos.clone(),
        repos.clone(),
    ));
    let queues = Arc::new(JobQueues::new());
    let policy = QueuePolicy::default();

    Harness {
        store,
        repos: repos.clone(),
        profiles: ProfileService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repos.clone(),
            repos.clone(),
            repos.clone(),
        ),
        follows: FollowService::new(
            Arc::clone(&kv),
            Arc::clone(&invalidation),
            repos.clone(),
            repos.clone(),
            Arc::clone(&queues),
            policy,
        ),
        comments: CommentService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repos.clone(),
            repos.clone(),
            Arc::clone(&queues),
            policy,
        ),
        taxonomy: TaxonomyService::new(cache, invalidation, repos),
    }
}

fn default_page() -> CommentPage {
    CommentPage {
        page: 1,
        limit: 10,
        sort: CommentSort::Newest,
    }
}

#[tokio::test]
async fn profile_update_is_visible_on_the_next_read() {
    let h = harness();
    let user = h.repos.seed_user("alice", "alice@example.com");

    // Warm the cache, then mutate through the service.
    let before = h.profiles.get_profile(user.id, None).await.unwrap();
    assert_eq!(before.bio, None);

    let update = ProfileUpdate {
        bio: Some("systems person".to_string()),
        ..ProfileUpdate::default()
    };
    h.profiles.update_profile(user.id, update).await.unwrap();

    let after = h.profiles.get_profile(user.id, None).await.unwrap();
    assert_eq!(after.bio.as_deref(), Some("systems person"));

    // The refresh repopulated the cached mirror, so the read above was a hit.
    let cached = h.store.get_raw(&keys::profile(user.id)).await.unwrap();
    assert!(cached.unwrap().contains("systems person"));
}

#[tokio::test]
async fn empty_profile_update_is_rejected() {
    let h = harness();
    let user = h.repos.seed_user("alice", "alice@example.com");
    let err = h
        .profiles
        .update_profile(user.id, ProfileUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn username_collision_is_a_conflict() {
    let h = harness();
    h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");

    let update = ProfileUpdate {
        username: Some("alice".to_string()),
        ..ProfileUpdate::default()
    };
    let err = h.profiles.update_profile(bob.id, update).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn follow_round_trip_keeps_cached_counters_consistent() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");

    // Warm the cached aggregate before following.
    let warm = h.profiles.get_profile(bob.id, Some(alice.id)).await.unwrap();
    assert_eq!(warm.followers_count, 0);
    assert!(!warm.is_following);

    h.follows.follow(alice.id, bob.id).await.unwrap();
    let followed = h.profiles.get_profile(bob.id, Some(alice.id)).await.unwrap();
    assert_eq!(followed.followers_count, 1);
    assert!(followed.is_following);

    let alice_view = h.profiles.get_profile(alice.id, None).await.unwrap();
    assert_eq!(alice_view.following_count, 1);

    h.follows.unfollow(alice.id, bob.id).await.unwrap();
    let unfollowed = h.profiles.get_profile(bob.id, Some(alice.id)).await.unwrap();
    assert_eq!(unfollowed.followers_count, 0);
    assert!(!unfollowed.is_following);
}

#[tokio::test]
async fn follower_listings_reflect_the_graph() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");
    let carol = h.repos.seed_user("carol", "carol@example.com");

    h.follows.follow(alice.id, bob.id).await.unwrap();
    h.follows.follow(carol.id, bob.id).await.unwrap();

    let followers = h.follows.followers(bob.id).await.unwrap();
    let names: Vec<&str> = followers.iter().map(|user| user.username.as_str()).collect();
    assert_eq!(names, vec!["alice", "carol"]);

    let following = h.follows.following(alice.id).await.unwrap();
    assert_eq!(following.len(), 1);
    assert_eq!(following[0].id, bob.id);

    assert!(h.follows.following_status(alice.id, bob.id).await.unwrap());
    assert!(!h.follows.following_status(bob.id, alice.id).await.unwrap());
}

#[tokio::test]
async fn user_mirror_is_refreshed_after_a_profile_update() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");

    // Warm the user mirror, then rename through the service.
    let before = h.profiles.get_user(alice.id).await.unwrap();
    assert_eq!(before.username, "alice");

    let update = ProfileUpdate {
        username: Some("alicia".to_string()),
        ..ProfileUpdate::default()
    };
    h.profiles.update_profile(alice.id, update).await.unwrap();

    // Both mirrors are repopulated before the update call returns.
    let user_raw = h.store.get_raw(&keys::user(alice.id)).await.unwrap();
    assert!(user_raw.unwrap().contains("alicia"));
    let profile_raw = h.store.get_raw(&keys::profile(alice.id)).await.unwrap();
    assert!(profile_raw.unwrap().contains("alicia"));

    let after = h.profiles.get_user(alice.id).await.unwrap();
    assert_eq!(after.username, "alicia");
}

#[tokio::test]
async fn duplicate_follow_is_a_conflict_and_self_follow_is_invalid() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");

    h.follows.follow(alice.id, bob.id).await.unwrap();
    let dup = h.follows.follow(alice.id, bob.id).await.unwrap_err();
    assert!(matches!(dup, AppError::Conflict(_)));

    let own = h.follows.follow(alice.id, alice.id).await.unwrap_err();
    assert!(matches!(own, AppError::Validation(_)));
}

#[tokio::test]
async fn unfollow_without_a_follow_is_not_found() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");
    let err = h.follows.unfollow(alice.id, bob.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[tokio::test]
async fn new_comment_drops_every_cached_page_variant() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");
    let post = h.repos.seed_post(alice.id, "Hello");

    // Warm two page variants of the same post.
    let page = default_page();
    let oldest = CommentPage {
        sort: CommentSort::Oldest,
        ..default_page()
    };
    h.comments
        .list_comments(post.id, page, Some(alice.id))
        .await
        .unwrap();
    h.comments.list_comments(post.id, oldest, None).await.unwrap();
    let warmed = h
        .store
        .scan_keys(&keys::post_comments_pattern(post.id))
        .await
        .unwrap();
    assert_eq!(warmed.len(), 2);

    h.comments
        .add_comment(bob.id, post.id, "First!".to_string(), None)
        .await
        .unwrap();

    let remaining = h
        .store
        .scan_keys(&keys::post_comments_pattern(post.id))
        .await
        .unwrap();
    assert!(remaining.is_empty());

    let listed = h
        .comments
        .list_comments(post.id, default_page(), None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].body, "First!");
}

#[tokio::test]
async fn comment_page_invalidation_is_idempotent() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let post = h.repos.seed_post(alice.id, "Hello");

    let invalidation = InvalidationRouter::new(h.store.clone(), h.repos.clone(), h.repos.clone());
    h.comments
        .list_comments(post.id, default_page(), None)
        .await
        .unwrap();

    assert_eq!(invalidation.drop_post_comments(post.id).await.unwrap(), 1);
    assert_eq!(invalidation.drop_post_comments(post.id).await.unwrap(), 0);
}

#[tokio::test]
async fn only_the_author_may_edit_or_delete_a_comment() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");
    let post = h.repos.seed_post(alice.id, "Hello");

    let comment = h
        .comments
        .add_comment(alice.id, post.id, "mine".to_string(), None)
        .await
        .unwrap();

    let edit = h
        .comments
        .update_comment(comment.id, bob.id, "hijacked".to_string())
        .await
        .unwrap_err();
    assert!(matches!(edit, AppError::Unauthorized));

    let delete = h.comments.delete_comment(comment.id, bob.id).await.unwrap_err();
    assert!(matches!(delete, AppError::Unauthorized));
}

#[tokio::test]
async fn toggling_a_like_twice_returns_to_the_unliked_state() {
    let h = harness();
    let alice = h.repos.seed_user("alice", "alice@example.com");
    let bob = h.repos.seed_user("bob", "bob@example.com");
    let post = h.repos.seed_post(alice.id, "Hello");
    let comment = h
        .comments
        .add_comment(alice.id, post.id, "mine".to_string(), None)
        .await
        .unwrap();

    assert!(h.comments.toggle_like(comment.id, bob.id).await.unwrap());
    assert!(!h.comments.toggle_like(comment.id, bob.id).await.unwrap());
}

#[tokio::test]
async fn taxonomy_listing_refreshes_after_a_create() {
    let h = harness();

    let empty = h.taxonomy.list_tags().await.unwrap();
    assert!(empty.is_empty());

    h.taxonomy.create_tag("Rust".to_string()).await.unwrap();
    let tags = h.taxonomy.list_tags().await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].name, "Rust");
}
