//! OAuth sign-in and account-email flows through the job queues and their
//! workers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devhub::application::error::AppError;
use devhub::application::jobs::email::MailError;
use devhub::application::jobs::{JobQueues, MailSender, QueuePolicy, spawn_workers};
use devhub::application::services::{AuthService, OAuthPolicy};
use devhub::cache::{KeyValueStore, MemoryStore};
use devhub::domain::users::OAuthIdentity;
use devhub::gateway::NotificationGateway;
use devhub::infra::memory::MemoryRepositories;

fn identity(email: &str) -> OAuthIdentity {
    OAuthIdentity {
        provider: "github".to_string(),
        subject: "12345".to_string(),
        email: email.to_string(),
        username: Some("octocat".to_string()),
        display_name: Some("Octo Cat".to_string()),
        image_url: None,
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

struct Flow {
    service: AuthService,
    repos: Arc<MemoryRepositories>,
    mailer: Arc<RecordingMailer>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

fn flow_with_workers(policy: OAuthPolicy) -> Flow {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let repos = Arc::new(MemoryRepositories::new());
    let gateway = NotificationGateway::new(store, repos.clone(), Duration::from_millis(100));
    let queues = Arc::new(JobQueues::new());
    let mailer = Arc::new(RecordingMailer::default());
    let handles = spawn_workers(&queues, mailer.clone(), repos.clone(), gateway);
    let service = AuthService::new(queues, repos.clone(), policy, QueuePolicy::default());
    Flow {
        service,
        repos,
        mailer,
        handles,
    }
}

/// Let the worker tasks drain their queues; paused time auto-advances once
/// every task is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn sign_in_resolves_to_a_user() {
    let flow = flow_with_workers(OAuthPolicy::default());

    let user = flow
        .service
        .resolve_oauth_identity(&identity("octo@example.com"))
        .await
        .unwrap();
    assert_eq!(user.email, "octo@example.com");
    assert_eq!(user.username, "octocat");

    for handle in flow.handles {
        handle.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn repeat_sign_in_reuses_the_existing_account() {
    let flow = flow_with_workers(OAuthPolicy::default());

    let first = flow
        .service
        .resolve_oauth_identity(&identity("octo@example.com"))
        .await
        .unwrap();
    let second = flow
        .service
        .resolve_oauth_identity(&identity("octo@example.com"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    for handle in flow.handles {
        handle.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn sign_in_times_out_when_no_worker_is_running() {
    // Queues without workers: the job stays queued past the deadline.
    let queues = Arc::new(JobQueues::new());
    let repos = Arc::new(MemoryRepositories::new());
    let policy = OAuthPolicy {
        timeout: Duration::from_millis(200),
        ..OAuthPolicy::default()
    };
    let service = AuthService::new(queues, repos, policy, QueuePolicy::default());

    let err = service
        .resolve_oauth_identity(&identity("octo@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UpstreamTimeout));
}

#[tokio::test(start_paused = true)]
async fn password_reset_request_emails_the_account_holder() {
    let flow = flow_with_workers(OAuthPolicy::default());
    flow.repos.seed_user("octocat", "octo@example.com");

    flow.service
        .request_password_reset("octo@example.com")
        .await
        .unwrap();
    settle().await;

    {
        let sent = flow.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "octo@example.com");
        assert_eq!(sent[0].1, "Reset your password");
    }

    for handle in flow.handles {
        handle.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn password_reset_for_an_unknown_address_is_not_found() {
    let flow = flow_with_workers(OAuthPolicy::default());

    let err = flow
        .service
        .request_password_reset("ghost@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    for handle in flow.handles {
        handle.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn verification_request_emails_the_user() {
    let flow = flow_with_workers(OAuthPolicy::default());
    let user = flow.repos.seed_user("octocat", "octo@example.com");

    flow.service
        .request_email_verification(user.id)
        .await
        .unwrap();
    settle().await;

    {
        let sent = flow.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Verify your account");
    }

    for handle in flow.handles {
        handle.abort();
    }
}
