//! REST handlers. Thin: authenticate, rate limit mutations, delegate to the
//! service, serialize.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::CommentPage;
use crate::domain::posts::CommentSort;
use crate::domain::users::{OAuthIdentity, ProfileUpdate, UserRecord};

use super::HttpState;

const DEFAULT_COMMENT_LIMIT: u32 = 10;
const MAX_COMMENT_LIMIT: u32 = 100;
const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;

async fn throttled(state: &HttpState, user: &UserRecord) -> Result<(), AppError> {
    state.rate_limiter.consume(&user.id.to_string()).await?;
    Ok(())
}

pub async fn get_profile(
    State(state): State<HttpState>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let viewer = state.auth.identify(&headers).await?.map(|user| user.id);
    let profile = state.profiles.get_profile(user_id, viewer).await?;
    Ok(Json(profile))
}

pub async fn get_user(
    State(state): State<HttpState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.profiles.get_user(user_id).await?;
    Ok(Json(user))
}

pub async fn update_profile(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(update): Json<ProfileUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    let profile = state.profiles.update_profile(user.id, update).await?;
    Ok(Json(profile))
}

pub async fn follow_user(
    State(state): State<HttpState>,
    Path(followee): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    state.follows.follow(user.id, followee).await?;
    Ok(Json(json!({ "following": true })))
}

pub async fn unfollow_user(
    State(state): State<HttpState>,
    Path(followee): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    state.follows.unfollow(user.id, followee).await?;
    Ok(Json(json!({ "following": false })))
}

pub async fn follow_status(
    State(state): State<HttpState>,
    Path(followee): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    let following = state.follows.following_status(user.id, followee).await?;
    Ok(Json(json!({ "following": following })))
}

pub async fn list_followers(
    State(state): State<HttpState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.follows.followers(user_id).await?))
}

pub async fn list_following(
    State(state): State<HttpState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.follows.following(user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CommentListQuery {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    sort: Option<CommentSort>,
}

pub async fn list_comments(
    State(state): State<HttpState>,
    Path(post_id): Path<Uuid>,
    Query(query): Query<CommentListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let viewer = state.auth.identify(&headers).await?.map(|user| user.id);
    let page = CommentPage {
        page: query.page.unwrap_or(1).max(1),
        limit: query
            .limit
            .unwrap_or(DEFAULT_COMMENT_LIMIT)
            .clamp(1, MAX_COMMENT_LIMIT),
        sort: query.sort.unwrap_or_default(),
    };
    let comments = state.comments.list_comments(post_id, page, viewer).await?;
    Ok(Json(comments))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentBody {
    body: String,
    #[serde(default)]
    parent_id: Option<Uuid>,
}

pub async fn create_comment(
    State(state): State<HttpState>,
    Path(post_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<NewCommentBody>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    let comment = state
        .comments
        .add_comment(user.id, post_id, body.body, body.parent_id)
        .await?;
    Ok(Json(comment))
}

pub async fn toggle_comment_like(
    State(state): State<HttpState>,
    Path(comment_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    let liked = state.comments.toggle_like(comment_id, user.id).await?;
    Ok(Json(json!({ "liked": liked })))
}

#[derive(Debug, Deserialize)]
pub struct CommentUpdateBody {
    body: String,
}

pub async fn update_comment(
    State(state): State<HttpState>,
    Path(comment_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CommentUpdateBody>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    let comment = state
        .comments
        .update_comment(comment_id, user.id, body.body)
        .await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(state): State<HttpState>,
    Path(comment_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    state.comments.delete_comment(comment_id, user.id).await?;
    Ok(Json(json!({ "deleted": true })))
}

pub async fn list_tags(State(state): State<HttpState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.taxonomy.list_tags().await?))
}

pub async fn list_categories(
    State(state): State<HttpState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.taxonomy.list_categories().await?))
}

#[derive(Debug, Deserialize)]
pub struct NewTagBody {
    name: String,
}

pub async fn create_tag(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<NewTagBody>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    Ok(Json(state.taxonomy.create_tag(body.name).await?))
}

#[derive(Debug, Deserialize)]
pub struct NewCategoryBody {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

pub async fn create_category(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<NewCategoryBody>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    Ok(Json(
        state
            .taxonomy
            .create_category(body.name, body.description)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    #[serde(default)]
    limit: Option<u32>,
}

pub async fn list_notifications(
    State(state): State<HttpState>,
    Query(query): Query<NotificationListQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    let limit = query.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT);
    Ok(Json(state.notifications.list(user.id, limit).await?))
}

pub async fn unread_count(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    let count = state.notifications.unread_count(user.id).await?;
    Ok(Json(json!({ "unread": count })))
}

pub async fn mark_all_read(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    let flipped = state.notifications.mark_all_read(user.id).await?;
    Ok(Json(json!({ "marked": flipped })))
}

pub async fn oauth_sign_in(
    State(state): State<HttpState>,
    Json(identity): Json<OAuthIdentity>,
) -> Result<impl IntoResponse, AppError> {
    if identity.email.trim().is_empty() {
        return Err(AppError::validation("identity email must not be empty"));
    }
    let user = state.auth_flow.resolve_oauth_identity(&identity).await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetBody {
    email: String,
}

pub async fn request_password_reset(
    State(state): State<HttpState>,
    Json(body): Json<PasswordResetBody>,
) -> Result<impl IntoResponse, AppError> {
    // Unauthenticated, so the limiter is keyed by target address.
    state
        .rate_limiter
        .consume(&format!("password-reset:{}", body.email))
        .await?;
    state.auth_flow.request_password_reset(&body.email).await?;
    Ok(Json(json!({ "queued": true })))
}

pub async fn request_email_verification(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.authenticate(&headers).await?;
    throttled(&state, &user).await?;
    state.auth_flow.request_email_verification(user.id).await?;
    Ok(Json(json!({ "queued": true })))
}
