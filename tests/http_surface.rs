//! Websocket handshake behavior of the HTTP surface, exercised over a real
//! listener so the upgrade headers are in play.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use devhub::application::jobs::{JobQueues, QueuePolicy, TracingMailer, spawn_workers};
use devhub::application::services::{
    AuthService, CommentService, FollowService, NotificationService, OAuthPolicy, ProfileService,
    TaxonomyService,
};
use devhub::cache::{CacheAside, InvalidationRouter, KeyValueStore, MemoryStore, RateLimiter};
use devhub::gateway::NotificationGateway;
use devhub::infra::http::{self, HeaderAuthGuard, HttpState};
use devhub::infra::memory::MemoryRepositories;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

fn router() -> Router {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let repos = Arc::new(MemoryRepositories::new());
    let cache = Arc::new(CacheAside::new(Arc::clone(&store), Duration::from_secs(3600)));
    let invalidation = Arc::new(InvalidationRouter::new(
        Arc::clone(&store),
        repos.clone(),
        repos.clone(),
    ));
    let gateway = NotificationGateway::new(
        Arc::clone(&store),
        repos.clone(),
        Duration::from_millis(100),
    );
    let queues = Arc::new(JobQueues::new());
    spawn_workers(
        &queues,
        Arc::new(TracingMailer),
        repos.clone(),
        Arc::clone(&gateway),
    );
    let policy = QueuePolicy::default();

    let state = HttpState {
        profiles: Arc::new(ProfileService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repos.clone(),
            repos.clone(),
            repos.clone(),
        )),
        follows: Arc::new(FollowService::new(
            Arc::clone(&store),
            Arc::clone(&invalidation),
            repos.clone(),
            repos.clone(),
            Arc::clone(&queues),
            policy,
        )),
        comments: Arc::new(CommentService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repos.clone(),
            repos.clone(),
            Arc::clone(&queues),
            policy,
        )),
        taxonomy: Arc::new(TaxonomyService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repos.clone(),
        )),
        notifications: Arc::new(NotificationService::new(repos.clone())),
        auth_flow: Arc::new(AuthService::new(
            Arc::clone(&queues),
            repos.clone(),
            OAuthPolicy::default(),
            policy,
        )),
        gateway,
        rate_limiter: Arc::new(RateLimiter::new(
            Arc::clone(&store),
            Duration::from_secs(60),
            120,
        )),
        auth: Arc::new(HeaderAuthGuard::new(repos)),
    };
    http::build_router(state)
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .unwrap();
    });
    addr
}

/// Issue a websocket handshake and return the response status line.
async fn handshake_status(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        response.extend_from_slice(&chunk[..n]);
        if response.windows(2).any(|pair| pair == b"\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&response)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn ws_connection_without_a_user_id_is_rejected() {
    let addr = serve(router()).await;
    let status = handshake_status(addr, "/notifications/ws").await;
    assert!(status.contains("401"), "unexpected status line: {status}");
}

#[tokio::test]
async fn ws_connection_with_a_malformed_user_id_is_rejected() {
    let addr = serve(router()).await;
    let status = handshake_status(addr, "/notifications/ws?userId=not-a-uuid").await;
    assert!(status.contains("400"), "unexpected status line: {status}");
}

#[tokio::test]
async fn ws_connection_with_a_user_id_upgrades() {
    let addr = serve(router()).await;
    let path = format!("/notifications/ws?userId={}", Uuid::new_v4());
    let status = handshake_status(addr, &path).await;
    assert!(status.contains("101"), "unexpected status line: {status}");
}
