//! Job queues and their workers.

pub mod email;
pub mod notify;
pub mod oauth;
pub mod queue;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::application::repos::UsersRepo;
use crate::gateway::NotificationGateway;

pub use email::{EmailWorker, MailSender, TracingMailer};
pub use notify::NotificationWorker;
pub use oauth::OAuthWorker;
pub use queue::{Backoff, JobError, JobHandler, JobId, JobOptions, JobQueue, JobState};

/// Retry policy applied to enqueued side-effect jobs, derived from
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl QueuePolicy {
    pub fn options(&self) -> JobOptions {
        JobOptions {
            attempts: self.attempts,
            backoff: self.backoff,
            ..JobOptions::default()
        }
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// The three queues the application runs.
pub struct JobQueues {
    pub email: Arc<JobQueue>,
    pub auth: Arc<JobQueue>,
    pub notifications: Arc<JobQueue>,
}

impl JobQueues {
    pub fn new() -> Self {
        Self {
            email: Arc::new(JobQueue::new(email::EMAIL_QUEUE)),
            auth: Arc::new(JobQueue::new(oauth::AUTH_QUEUE)),
            notifications: Arc::new(JobQueue::new(notify::NOTIFICATIONS_QUEUE)),
        }
    }
}

impl Default for JobQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn one worker task per queue. Handles are aborted on shutdown.
pub fn spawn_workers(
    queues: &JobQueues,
    mailer: Arc<dyn MailSender>,
    users: Arc<dyn UsersRepo>,
    gateway: Arc<NotificationGateway>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_worker(Arc::clone(&queues.email), Arc::new(EmailWorker::new(mailer))),
        spawn_worker(Arc::clone(&queues.auth), Arc::new(OAuthWorker::new(users))),
        spawn_worker(
            Arc::clone(&queues.notifications),
            Arc::new(NotificationWorker::new(gateway)),
        ),
    ]
}

fn spawn_worker(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> JoinHandle<()> {
    tokio::spawn(async move { queue.run(handler.as_ref()).await })
}
