//! Request authentication.
//!
//! Token verification is an upstream concern; by the time a request reaches
//! this service the edge proxy has resolved the caller to a user id header.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::UsersRepo;
use crate::domain::users::UserRecord;

pub const USER_ID_HEADER: &str = "x-user-id";

#[async_trait]
pub trait AuthGuard: Send + Sync {
    /// Resolve the calling user or error with [`AppError::Unauthorized`].
    async fn authenticate(&self, headers: &HeaderMap) -> Result<UserRecord, AppError>;

    /// Like [`authenticate`](Self::authenticate) but anonymous callers are
    /// allowed through as `None`.
    async fn identify(&self, headers: &HeaderMap) -> Result<Option<UserRecord>, AppError> {
        if !headers.contains_key(USER_ID_HEADER) {
            return Ok(None);
        }
        self.authenticate(headers).await.map(Some)
    }
}

pub struct HeaderAuthGuard {
    users: Arc<dyn UsersRepo>,
}

impl HeaderAuthGuard {
    pub fn new(users: Arc<dyn UsersRepo>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthGuard for HeaderAuthGuard {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<UserRecord, AppError> {
        let raw = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let user_id = Uuid::parse_str(raw).map_err(|_| AppError::Unauthorized)?;
        self.users
            .find_user(user_id)
            .await?
            .ok_or(AppError::Unauthorized)
    }
}
