use std::{process, sync::Arc, time::Duration};

use devhub::{
    application::{
        error::AppError,
        jobs::{JobQueues, TracingMailer, spawn_workers},
        services::{
            AuthService, CommentService, FollowService, NotificationService, ProfileService,
            TaxonomyService,
        },
    },
    cache::{CacheAside, InvalidationRouter, RateLimiter, store::KeyValueStore},
    config,
    gateway::NotificationGateway,
    infra::{
        error::InfraError,
        http::{self, HeaderAuthGuard, HttpState},
        memory::MemoryRepositories,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = init_store(&settings).await?;
    let repositories = Arc::new(MemoryRepositories::new());

    let cache = Arc::new(CacheAside::new(
        Arc::clone(&store),
        settings.cache.default_ttl,
    ));
    let invalidation = Arc::new(InvalidationRouter::new(
        Arc::clone(&store),
        repositories.clone(),
        repositories.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(
        Arc::clone(&store),
        settings.rate_limit.window(),
        settings.rate_limit.max_requests.get().into(),
    ));

    let gateway = NotificationGateway::new(
        Arc::clone(&store),
        repositories.clone(),
        settings.gateway.dedup_window,
    );
    gateway.start().await?;

    let queues = Arc::new(JobQueues::new());
    let worker_handles = spawn_workers(
        &queues,
        Arc::new(TracingMailer),
        repositories.clone(),
        Arc::clone(&gateway),
    );

    let job_policy = settings.jobs.policy();
    let state = HttpState {
        profiles: Arc::new(ProfileService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repositories.clone(),
            repositories.clone(),
            repositories.clone(),
        )),
        follows: Arc::new(FollowService::new(
            Arc::clone(&store),
            Arc::clone(&invalidation),
            repositories.clone(),
            repositories.clone(),
            Arc::clone(&queues),
            job_policy,
        )),
        comments: Arc::new(CommentService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repositories.clone(),
            repositories.clone(),
            Arc::clone(&queues),
            job_policy,
        )),
        taxonomy: Arc::new(TaxonomyService::new(
            Arc::clone(&cache),
            Arc::clone(&invalidation),
            repositories.clone(),
        )),
        notifications: Arc::new(NotificationService::new(repositories.clone())),
        auth_flow: Arc::new(AuthService::new(
            Arc::clone(&queues),
            repositories.clone(),
            settings.oauth.policy(),
            job_policy,
        )),
        gateway: Arc::clone(&gateway),
        rate_limiter,
        auth: Arc::new(HeaderAuthGuard::new(repositories.clone())),
    };

    let result = serve_http(&settings, state).await;

    for handle in worker_handles {
        handle.abort();
    }
    gateway.shutdown().await;
    if let Err(err) = store.close().await {
        warn!(error = %err, "store close failed");
    }

    result
}

async fn init_store(settings: &config::Settings) -> Result<Arc<dyn KeyValueStore>, AppError> {
    match settings.store.mode {
        config::StoreMode::Memory => {
            info!(target = "devhub::store", "using in-process key/value store");
            Ok(Arc::new(devhub::cache::MemoryStore::new()))
        }
        config::StoreMode::Redis => {
            let url = settings
                .store
                .redis_url
                .as_ref()
                .ok_or_else(|| InfraError::configuration("redis url is not configured"))
                .map_err(AppError::from)?;
            let store = devhub::cache::redis::RedisStore::connect(url).await?;
            info!(target = "devhub::store", "connected to redis");
            Ok(Arc::new(store))
        }
    }
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "devhub::server",
        addr = %settings.server.addr,
        "listening"
    );

    let graceful = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(graceful))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal(graceful: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install shutdown handler");
        return;
    }
    info!(timeout = ?graceful, "shutdown signal received, draining connections");
}
