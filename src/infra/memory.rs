//! In-memory reference adapters for the repository traits.
//!
//! Used by the test suites and by `store.mode = "memory"` deployments. All
//! collections live behind one mutex; every method does its work in a single
//! lock hold, which is what makes `update_profile_atomic` atomic here.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CommentPage, CommentsRepo, FollowsRepo, NewComment, NotificationsRepo, ProfilesRepo,
    RepoError, TaxonomyRepo, UsersRepo,
};
use crate::domain::notifications::{NewNotification, NotificationRecord};
use crate::domain::posts::{
    CategoryRecord, CommentAuthor, CommentRecord, CommentSort, CommentView, PostRecord, TagRecord,
};
use crate::domain::users::{OAuthIdentity, ProfileAggregate, ProfileUpdate, UserRecord};
use crate::util::lock::mutex_lock;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, UserRecord>,
    follows: HashSet<(Uuid, Uuid)>,
    posts: HashMap<Uuid, PostRecord>,
    comments: Vec<CommentRecord>,
    notifications: Vec<NotificationRecord>,
    tags: Vec<TagRecord>,
    categories: Vec<CategoryRecord>,
}

#[derive(Default)]
pub struct MemoryRepositories {
    state: Mutex<State>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, State> {
        mutex_lock(&self.state, "infra::memory", op)
    }

    pub fn seed_user(&self, username: &str, email: &str) -> UserRecord {
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            display_name: None,
            image_url: None,
            bio: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock("seed_user").users.insert(user.id, user.clone());
        user
    }

    pub fn seed_post(&self, author_id: Uuid, title: &str) -> PostRecord {
        let post = PostRecord {
            id: Uuid::new_v4(),
            author_id,
            title: title.to_string(),
            slug: title.to_lowercase().replace(' ', "-"),
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock("seed_post").posts.insert(post.id, post.clone());
        post
    }
}

fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}

#[async_trait]
impl UsersRepo for MemoryRepositories {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        Ok(self.lock("find_user").users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        Ok(self
            .lock("find_user_by_email")
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn is_username_taken(
        &self,
        username: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool, RepoError> {
        Ok(self.lock("is_username_taken").users.values().any(|user| {
            user.username == username && exclude.map(|id| user.id != id).unwrap_or(true)
        }))
    }

    async fn upsert_oauth_user(&self, identity: &OAuthIdentity) -> Result<UserRecord, RepoError> {
        let mut state = self.lock("upsert_oauth_user");

        if let Some(existing) = state
            .users
            .values()
            .find(|user| user.email == identity.email)
            .map(|user| user.id)
        {
            let user = state.users.get_mut(&existing).expect("looked up above");
            if user.display_name.is_none() {
                user.display_name = identity.display_name.clone();
            }
            if user.image_url.is_none() {
                user.image_url = identity.image_url.clone();
            }
            return Ok(user.clone());
        }

        let base = identity
            .username
            .clone()
            .unwrap_or_else(|| identity.email.split('@').next().unwrap_or("user").to_string());
        let mut username = base.clone();
        let mut suffix = 1;
        while state.users.values().any(|user| user.username == username) {
            username = format!("{base}{suffix}");
            suffix += 1;
        }

        let user = UserRecord {
            id: Uuid::new_v4(),
            username,
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            image_url: identity.image_url.clone(),
            bio: None,
            created_at: OffsetDateTime::now_utc(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl ProfilesRepo for MemoryRepositories {
    async fn load_profile(
        &self,
        user_id: Uuid,
        viewer: Option<Uuid>,
    ) -> Result<Option<ProfileAggregate>, RepoError> {
        let state = self.lock("load_profile");
        let Some(user) = state.users.get(&user_id) else {
            return Ok(None);
        };
        let followers_count = state
            .follows
            .iter()
            .filter(|(_, followee)| *followee == user_id)
            .count() as u64;
        let following_count = state
            .follows
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .count() as u64;
        let is_following = viewer
            .map(|viewer| state.follows.contains(&(viewer, user_id)))
            .unwrap_or(false);
        Ok(Some(ProfileAggregate {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            image_url: user.image_url.clone(),
            bio: user.bio.clone(),
            followers_count,
            following_count,
            is_following,
        }))
    }

    async fn update_profile_atomic(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<UserRecord, RepoError> {
        let mut state = self.lock("update_profile_atomic");
        if let Some(username) = &update.username {
            let taken = state
                .users
                .values()
                .any(|user| user.username == *username && user.id != user_id);
            if taken {
                return Err(RepoError::duplicate("users_username_key"));
            }
        }
        let user = state.users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
        if let Some(username) = &update.username {
            user.username = username.clone();
        }
        if let Some(display_name) = &update.display_name {
            user.display_name = Some(display_name.clone());
        }
        if let Some(bio) = &update.bio {
            user.bio = Some(bio.clone());
        }
        if let Some(image_url) = &update.image_url {
            user.image_url = Some(image_url.clone());
        }
        Ok(user.clone())
    }
}

#[async_trait]
impl FollowsRepo for MemoryRepositories {
    async fn create_follow(&self, follower: Uuid, followee: Uuid) -> Result<(), RepoError> {
        let mut state = self.lock("create_follow");
        if !state.follows.insert((follower, followee)) {
            return Err(RepoError::duplicate("follows_pkey"));
        }
        Ok(())
    }

    async fn delete_follow(&self, follower: Uuid, followee: Uuid) -> Result<(), RepoError> {
        let mut state = self.lock("delete_follow");
        if !state.follows.remove(&(follower, followee)) {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn is_following(&self, follower: Uuid, followee: Uuid) -> Result<bool, RepoError> {
        Ok(self
            .lock("is_following")
            .follows
            .contains(&(follower, followee)))
    }

    async fn list_followers(&self, user_id: Uuid) -> Result<Vec<UserRecord>, RepoError> {
        let state = self.lock("list_followers");
        let mut users: Vec<UserRecord> = state
            .follows
            .iter()
            .filter(|(_, followee)| *followee == user_id)
            .filter_map(|(follower, _)| state.users.get(follower).cloned())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn list_following(&self, user_id: Uuid) -> Result<Vec<UserRecord>, RepoError> {
        let state = self.lock("list_following");
        let mut users: Vec<UserRecord> = state
            .follows
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .filter_map(|(_, followee)| state.users.get(followee).cloned())
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

#[async_trait]
impl CommentsRepo for MemoryRepositories {
    async fn find_post(&self, post_id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        Ok(self.lock("find_post").posts.get(&post_id).cloned())
    }

    async fn create_comment(&self, comment: NewComment) -> Result<CommentRecord, RepoError> {
        let mut state = self.lock("create_comment");
        if !state.posts.contains_key(&comment.post_id) {
            return Err(RepoError::NotFound);
        }
        let now = OffsetDateTime::now_utc();
        let record = CommentRecord {
            id: Uuid::new_v4(),
            post_id: comment.post_id,
            author_id: comment.author_id,
            body: comment.body,
            parent_id: comment.parent_id,
            liked_by: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.comments.push(record.clone());
        Ok(record)
    }

    async fn find_comment(&self, comment_id: Uuid) -> Result<Option<CommentRecord>, RepoError> {
        Ok(self
            .lock("find_comment")
            .comments
            .iter()
            .find(|comment| comment.id == comment_id)
            .cloned())
    }

    async fn list_comments(
        &self,
        post_id: Uuid,
        page: CommentPage,
        viewer: Option<Uuid>,
    ) -> Result<Vec<CommentView>, RepoError> {
        let state = self.lock("list_comments");
        let mut comments: Vec<&CommentRecord> = state
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .collect();
        match page.sort {
            // Stable sorts keep insertion order for equal keys, so ties
            // resolve deterministically.
            CommentSort::Newest => {
                comments.sort_by_key(|comment| comment.created_at);
                comments.reverse();
            }
            CommentSort::Oldest => comments.sort_by_key(|comment| comment.created_at),
            CommentSort::Top => {
                comments.sort_by_key(|comment| std::cmp::Reverse(comment.liked_by.len()));
            }
        }

        let offset = (page.page.max(1) - 1) as usize * page.limit as usize;
        Ok(comments
            .into_iter()
            .skip(offset)
            .take(page.limit as usize)
            .map(|comment| {
                let author = state
                    .users
                    .get(&comment.author_id)
                    .map(|user| CommentAuthor {
                        id: user.id,
                        username: user.username.clone(),
                        image_url: user.image_url.clone(),
                    })
                    .unwrap_or(CommentAuthor {
                        id: comment.author_id,
                        username: "deleted".to_string(),
                        image_url: None,
                    });
                CommentView {
                    id: comment.id,
                    post_id: comment.post_id,
                    author,
                    body: comment.body.clone(),
                    parent_id: comment.parent_id,
                    like_count: comment.liked_by.len() as u64,
                    liked_by_viewer: viewer
                        .map(|viewer| comment.liked_by.contains(&viewer))
                        .unwrap_or(false),
                    created_at: comment.created_at,
                }
            })
            .collect())
    }

    async fn toggle_comment_like(
        &self,
        comment_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, RepoError> {
        let mut state = self.lock("toggle_comment_like");
        let comment = state
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
            .ok_or(RepoError::NotFound)?;
        if let Some(pos) = comment.liked_by.iter().position(|id| *id == user_id) {
            comment.liked_by.remove(pos);
            Ok(false)
        } else {
            comment.liked_by.push(user_id);
            Ok(true)
        }
    }

    async fn update_comment(
        &self,
        comment_id: Uuid,
        body: String,
    ) -> Result<CommentRecord, RepoError> {
        let mut state = self.lock("update_comment");
        let comment = state
            .comments
            .iter_mut()
            .find(|comment| comment.id == comment_id)
            .ok_or(RepoError::NotFound)?;
        comment.body = body;
        comment.updated_at = OffsetDateTime::now_utc();
        Ok(comment.clone())
    }

    async fn delete_comment(&self, comment_id: Uuid) -> Result<(), RepoError> {
        let mut state = self.lock("delete_comment");
        let before = state.comments.len();
        state.comments.retain(|comment| comment.id != comment_id);
        if state.comments.len() == before {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationsRepo for MemoryRepositories {
    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationRecord, RepoError> {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            kind: notification.kind,
            user_id: notification.user_id,
            message: notification.message,
            link: notification.link,
            image_url: notification.image_url,
            metadata: notification.metadata,
            is_read: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.lock("create_notification")
            .notifications
            .push(record.clone());
        Ok(record)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, RepoError> {
        let state = self.lock("list_notifications");
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|notification| notification.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<u64, RepoError> {
        Ok(self
            .lock("unread_count")
            .notifications
            .iter()
            .filter(|notification| notification.user_id == user_id && !notification.is_read)
            .count() as u64)
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, RepoError> {
        let mut state = self.lock("mark_all_read");
        let mut flipped = 0;
        for notification in state
            .notifications
            .iter_mut()
            .filter(|notification| notification.user_id == user_id && !notification.is_read)
        {
            notification.is_read = true;
            flipped += 1;
        }
        Ok(flipped)
    }
}

#[async_trait]
impl TaxonomyRepo for MemoryRepositories {
    async fn list_tags(&self) -> Result<Vec<TagRecord>, RepoError> {
        Ok(self.lock("list_tags").tags.clone())
    }

    async fn list_categories(&self) -> Result<Vec<CategoryRecord>, RepoError> {
        Ok(self.lock("list_categories").categories.clone())
    }

    async fn create_tag(&self, name: String) -> Result<TagRecord, RepoError> {
        let slug = slugify(&name);
        let mut state = self.lock("create_tag");
        if state.tags.iter().any(|tag| tag.slug == slug) {
            return Err(RepoError::duplicate("tags_slug_key"));
        }
        let tag = TagRecord {
            id: Uuid::new_v4(),
            name,
            slug,
            post_count: 0,
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }

    async fn create_category(
        &self,
        name: String,
        description: Option<String>,
    ) -> Result<CategoryRecord, RepoError> {
        let slug = slugify(&name);
        let mut state = self.lock("create_category");
        if state.categories.iter().any(|category| category.slug == slug) {
            return Err(RepoError::duplicate("categories_slug_key"));
        }
        let category = CategoryRecord {
            id: Uuid::new_v4(),
            name,
            slug,
            description,
        };
        state.categories.push(category.clone());
        Ok(category)
    }
}
