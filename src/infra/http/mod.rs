//! HTTP surface: router, shared state, authentication and the websocket
//! bridge.

pub mod auth;
pub mod handlers;
pub mod ws;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::application::services::{
    AuthService, CommentService, FollowService, NotificationService, ProfileService,
    TaxonomyService,
};
use crate::cache::RateLimiter;
use crate::gateway::NotificationGateway;

pub use auth::{AuthGuard, HeaderAuthGuard, USER_ID_HEADER};

#[derive(Clone)]
pub struct HttpState {
    pub profiles: Arc<ProfileService>,
    pub follows: Arc<FollowService>,
    pub comments: Arc<CommentService>,
    pub taxonomy: Arc<TaxonomyService>,
    pub notifications: Arc<NotificationService>,
    pub auth_flow: Arc<AuthService>,
    pub gateway: Arc<NotificationGateway>,
    pub rate_limiter: Arc<RateLimiter>,
    pub auth: Arc<dyn AuthGuard>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/users/{id}", get(handlers::get_user))
        .route("/profiles/{id}", get(handlers::get_profile))
        .route("/profiles/me", patch(handlers::update_profile))
        .route("/profiles/{id}/followers", get(handlers::list_followers))
        .route("/profiles/{id}/following", get(handlers::list_following))
        .route("/follows/{id}", get(handlers::follow_status))
        .route("/follows/{id}", post(handlers::follow_user))
        .route("/follows/{id}", delete(handlers::unfollow_user))
        .route("/posts/{id}/comments", get(handlers::list_comments))
        .route("/posts/{id}/comments", post(handlers::create_comment))
        .route("/comments/{id}/like", post(handlers::toggle_comment_like))
        .route("/comments/{id}", patch(handlers::update_comment))
        .route("/comments/{id}", delete(handlers::delete_comment))
        .route("/tags", get(handlers::list_tags))
        .route("/tags", post(handlers::create_tag))
        .route("/categories", get(handlers::list_categories))
        .route("/categories", post(handlers::create_category))
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/unread-count", get(handlers::unread_count))
        .route("/notifications/read-all", post(handlers::mark_all_read))
        .route("/notifications/ws", get(ws::notifications_ws))
        .route("/auth/oauth", post(handlers::oauth_sign_in))
        .route(
            "/auth/password-reset",
            post(handlers::request_password_reset),
        )
        .route(
            "/auth/verify-email",
            post(handlers::request_email_verification),
        )
        .with_state(state)
}
