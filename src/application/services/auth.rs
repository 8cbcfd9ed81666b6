//! OAuth sign-in and account emails.
//!
//! Identity resolution is parked on the auth queue so provider flakiness is
//! absorbed by the queue's retry schedule; the request blocks on the job
//! outcome with a hard timeout.

use std::sync::Arc;
use std::time::Duration;

use crate::application::error::AppError;
use crate::application::jobs::email::{
    JOB_RESET_PASSWORD_EMAIL, JOB_VERIFICATION_EMAIL, ResetPasswordEmail, VerificationEmail,
};
use crate::application::jobs::oauth::JOB_OAUTH_RESOLUTION;
use crate::application::jobs::{Backoff, JobError, JobOptions, JobQueues, QueuePolicy};
use crate::application::repos::UsersRepo;
use crate::domain::users::{OAuthIdentity, UserRecord};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct OAuthPolicy {
    /// Total resolution attempts before the job fails.
    pub retries: u32,
    pub backoff_base: Duration,
    /// How long a sign-in request waits for the job outcome.
    pub timeout: Duration,
}

impl Default for OAuthPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_base: Duration::from_millis(2000),
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct AuthService {
    queues: Arc<JobQueues>,
    users: Arc<dyn UsersRepo>,
    oauth: OAuthPolicy,
    email_policy: QueuePolicy,
}

impl AuthService {
    pub fn new(
        queues: Arc<JobQueues>,
        users: Arc<dyn UsersRepo>,
        oauth: OAuthPolicy,
        email_policy: QueuePolicy,
    ) -> Self {
        Self {
            queues,
            users,
            oauth,
            email_policy,
        }
    }

    /// Resolve an upstream identity to a local user via the auth queue,
    /// blocking until the worker finishes or the timeout passes.
    pub async fn resolve_oauth_identity(
        &self,
        identity: &OAuthIdentity,
    ) -> Result<UserRecord, AppError> {
        let options = JobOptions {
            attempts: self.oauth.retries.max(1),
            backoff: Backoff::exponential(self.oauth.backoff_base),
            // Kept until the waiter has read the result below.
            remove_on_complete: false,
            remove_on_fail: false,
        };
        let id = self
            .queues
            .auth
            .enqueue(JOB_OAUTH_RESOLUTION, identity, options)?;

        let outcome = self
            .queues
            .auth
            .wait_for_completion(id, self.oauth.timeout)
            .await;
        self.queues.auth.remove(id);

        match outcome {
            Ok(value) => serde_json::from_value(value)
                .map_err(|err| AppError::unexpected(format!("oauth job result: {err}"))),
            Err(JobError::TimedOut(_)) => Err(AppError::UpstreamTimeout),
            Err(err) => Err(err.into()),
        }
    }

    /// Mint a reset token for the account behind `email` and queue the mail.
    /// Token validation happens at the identity provider, not here.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AppError> {
        let Some(user) = self.users.find_user_by_email(email).await? else {
            return Err(AppError::NotFound);
        };
        self.queue_password_reset_email(&user, Uuid::new_v4().to_string())
    }

    /// Queue a fresh verification mail for an existing account.
    pub async fn request_email_verification(&self, user_id: Uuid) -> Result<(), AppError> {
        let Some(user) = self.users.find_user(user_id).await? else {
            return Err(AppError::NotFound);
        };
        self.queue_verification_email(&user, Uuid::new_v4().to_string())
    }

    fn queue_verification_email(&self, user: &UserRecord, token: String) -> Result<(), AppError> {
        let mail = VerificationEmail {
            to: user.email.clone(),
            username: user.username.clone(),
            token,
        };
        self.queues
            .email
            .enqueue(JOB_VERIFICATION_EMAIL, &mail, self.email_policy.options())?;
        Ok(())
    }

    fn queue_password_reset_email(&self, user: &UserRecord, token: String) -> Result<(), AppError> {
        let mail = ResetPasswordEmail {
            to: user.email.clone(),
            username: user.username.clone(),
            token,
        };
        self.queues
            .email
            .enqueue(JOB_RESET_PASSWORD_EMAIL, &mail, self.email_policy.options())?;
        Ok(())
    }
}
