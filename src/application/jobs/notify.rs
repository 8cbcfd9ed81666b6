//! Notification queue worker: hands persisted-and-published delivery over to
//! the gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::domain::notifications::NewNotification;
use crate::gateway::NotificationGateway;

use super::queue::{JobEnvelope, JobError, JobHandler};

pub const NOTIFICATIONS_QUEUE: &str = "notifications";
pub const JOB_DELIVER_NOTIFICATION: &str = "deliver";

pub struct NotificationWorker {
    gateway: Arc<NotificationGateway>,
}

impl NotificationWorker {
    pub fn new(gateway: Arc<NotificationGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl JobHandler for NotificationWorker {
    async fn handle(&self, job: &JobEnvelope) -> Result<Option<Value>, JobError> {
        // A payload that cannot decode will never decode on retry either, so
        // it is logged and acknowledged rather than failed.
        let notification: NewNotification = match serde_json::from_value(job.payload.clone()) {
            Ok(notification) => notification,
            Err(err) => {
                warn!(
                    job = %job.name,
                    %job.id,
                    error = %err,
                    "dropping notification job with malformed payload"
                );
                return Ok(None);
            }
        };

        self.gateway
            .deliver(notification)
            .await
            .map_err(JobError::failed)?;
        Ok(None)
    }
}
