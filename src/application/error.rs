use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::application::jobs::JobError;
use crate::application::repos::RepoError;
use crate::cache::invalidation::InvalidationError;
use crate::cache::rate_limit::RateLimitError;
use crate::cache::store::StoreError;
use crate::gateway::GatewayError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("resource not found")]
    NotFound,
    #[error("not authorized")]
    Unauthorized,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error("upstream provider timed out")]
    UpstreamTimeout,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::NotFound => "Resource not found",
            AppError::Unauthorized => "Not authorized",
            AppError::Conflict(_) => "Request conflicts with current state",
            AppError::RateLimited { .. } => "Too many requests",
            AppError::UpstreamTimeout => "Upstream provider timed out",
            AppError::StoreUnavailable(_) => "Service temporarily unavailable",
            AppError::Validation(_) => "Request could not be processed",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        }
        let mut response = (status, self.presentation_message()).into_response();
        if let AppError::RateLimited { retry_after } = self {
            let seconds = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => AppError::NotFound,
            RepoError::Duplicate { constraint } => {
                AppError::Conflict(format!("duplicate record on `{constraint}`"))
            }
            RepoError::Persistence(message) => AppError::Unexpected(message),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Limited { retry_after } => AppError::RateLimited { retry_after },
            RateLimitError::Store(err) => err.into(),
        }
    }
}

impl From<InvalidationError> for AppError {
    fn from(err: InvalidationError) -> Self {
        match err {
            InvalidationError::Store(err) => err.into(),
            InvalidationError::Repo(err) => err.into(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Repo(err) => err.into(),
            GatewayError::Store(err) => err.into(),
            GatewayError::Encode(err) => AppError::Unexpected(err.to_string()),
        }
    }
}

impl From<crate::infra::InfraError> for AppError {
    fn from(err: crate::infra::InfraError) -> Self {
        AppError::Unexpected(err.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::TimedOut(_) => AppError::UpstreamTimeout,
            other => AppError::Unexpected(other.to_string()),
        }
    }
}
