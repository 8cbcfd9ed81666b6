//! Email queue worker.
//!
//! Retries are left to the queue; a transport failure surfaces as a job
//! failure so the normal backoff schedule applies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use super::queue::{JobEnvelope, JobError, JobHandler};

pub const EMAIL_QUEUE: &str = "email";
pub const JOB_VERIFICATION_EMAIL: &str = "verification";
pub const JOB_RESET_PASSWORD_EMAIL: &str = "reset-password";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Reference transport that writes the mail to the log instead of sending.
pub struct TracingMailer;

#[async_trait]
impl MailSender for TracingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(to, subject, body_len = body.len(), "mail dispatched");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEmail {
    pub to: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordEmail {
    pub to: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub struct EmailWorker {
    mailer: Arc<dyn MailSender>,
}

impl EmailWorker {
    pub fn new(mailer: Arc<dyn MailSender>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl JobHandler for EmailWorker {
    async fn handle(&self, job: &JobEnvelope) -> Result<Option<Value>, JobError> {
        let (to, subject, body) = match job.name.as_str() {
            JOB_VERIFICATION_EMAIL => {
                let mail: VerificationEmail =
                    serde_json::from_value(job.payload.clone()).map_err(JobError::payload)?;
                (
                    mail.to,
                    "Verify your account".to_string(),
                    format!(
                        "Hi {}, confirm your account with token {}.",
                        mail.username, mail.token
                    ),
                )
            }
            JOB_RESET_PASSWORD_EMAIL => {
                let mail: ResetPasswordEmail =
                    serde_json::from_value(job.payload.clone()).map_err(JobError::payload)?;
                (
                    mail.to,
                    "Reset your password".to_string(),
                    format!(
                        "Hi {}, reset your password with token {}.",
                        mail.username, mail.token
                    ),
                )
            }
            _ => {
                let mail: GenericEmail =
                    serde_json::from_value(job.payload.clone()).map_err(JobError::payload)?;
                (mail.to, mail.subject, mail.body)
            }
        };

        self.mailer
            .send(&to, &subject, &body)
            .await
            .map_err(JobError::failed)?;
        Ok(None)
    }
}
