//! OAuth resolution worker.
//!
//! Sign-in requests park the upstream identity on the auth queue and block on
//! the job result, so provider hiccups get the queue's retry schedule instead
//! of failing the login outright.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::repos::UsersRepo;
use crate::domain::users::OAuthIdentity;

use super::queue::{JobEnvelope, JobError, JobHandler};

pub const AUTH_QUEUE: &str = "auth";
pub const JOB_OAUTH_RESOLUTION: &str = "oauth-resolution";

pub struct OAuthWorker {
    users: Arc<dyn UsersRepo>,
}

impl OAuthWorker {
    pub fn new(users: Arc<dyn UsersRepo>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl JobHandler for OAuthWorker {
    async fn handle(&self, job: &JobEnvelope) -> Result<Option<Value>, JobError> {
        if job.name != JOB_OAUTH_RESOLUTION {
            return Err(JobError::UnknownKind(job.name.clone()));
        }
        let identity: OAuthIdentity =
            serde_json::from_value(job.payload.clone()).map_err(JobError::payload)?;
        let user = self
            .users
            .upsert_oauth_user(&identity)
            .await
            .map_err(JobError::failed)?;
        let user = serde_json::to_value(&user).map_err(JobError::failed)?;
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryRepositories;

    fn identity() -> OAuthIdentity {
        OAuthIdentity {
            provider: "github".to_string(),
            subject: "12345".to_string(),
            email: "dev@example.com".to_string(),
            username: Some("dev".to_string()),
            display_name: Some("Dev".to_string()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn resolution_creates_the_user_once() {
        let repos = Arc::new(MemoryRepositories::new());
        let worker = OAuthWorker::new(repos.clone());
        let payload = serde_json::to_value(identity()).unwrap();
        let envelope = JobEnvelope {
            id: uuid::Uuid::new_v4(),
            name: JOB_OAUTH_RESOLUTION.to_string(),
            payload,
            attempt: 0,
        };

        let first = worker.handle(&envelope).await.unwrap().unwrap();
        let second = worker.handle(&envelope).await.unwrap().unwrap();
        assert_eq!(first["id"], second["id"]);
        assert_eq!(first["email"], "dev@example.com");
    }

    #[tokio::test]
    async fn unknown_job_name_is_rejected() {
        let worker = OAuthWorker::new(Arc::new(MemoryRepositories::new()));
        let err = worker
            .handle(&JobEnvelope {
                id: uuid::Uuid::new_v4(),
                name: "mystery".to_string(),
                payload: Value::Null,
                attempt: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::UnknownKind(_)));
    }
}
