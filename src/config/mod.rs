//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::{Backoff, QueuePolicy};
use crate::application::services::OAuthPolicy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "devhub";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 120;
const DEFAULT_JOB_ATTEMPTS: u32 = 3;
const DEFAULT_JOB_BACKOFF_MS: u64 = 1000;
const DEFAULT_OAUTH_TIMEOUT_SECS: u64 = 15;
const DEFAULT_OAUTH_RETRIES: u32 = 3;
const DEFAULT_OAUTH_BACKOFF_MS: u64 = 2000;
const DEFAULT_DEDUP_WINDOW_MS: u64 = 100;

/// Command-line arguments for the devhub binary.
#[derive(Debug, Parser)]
#[command(name = "devhub", version, about = "Devhub community backend")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DEVHUB_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the store mode (memory|redis).
    #[arg(long = "store-mode", value_name = "MODE")]
    pub store_mode: Option<String>,

    /// Override the redis connection URL.
    #[arg(long = "store-redis-url", value_name = "URL")]
    pub store_redis_url: Option<String>,

    /// Override the default cache TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,

    /// Override the job attempt budget.
    #[arg(long = "jobs-attempts", value_name = "COUNT")]
    pub jobs_attempts: Option<u32>,

    /// Override the job backoff base delay.
    #[arg(long = "jobs-backoff-ms", value_name = "MILLIS")]
    pub jobs_backoff_ms: Option<u64>,

    /// Override how long a sign-in waits for OAuth resolution.
    #[arg(long = "oauth-timeout-seconds", value_name = "SECONDS")]
    pub oauth_timeout_seconds: Option<u64>,

    /// Override the OAuth resolution attempt budget.
    #[arg(long = "oauth-retries", value_name = "COUNT")]
    pub oauth_retries: Option<u32>,

    /// Override the OAuth resolution backoff base delay.
    #[arg(long = "oauth-backoff-ms", value_name = "MILLIS")]
    pub oauth_backoff_ms: Option<u64>,

    /// Override the gateway dedup window.
    #[arg(long = "gateway-dedup-window-ms", value_name = "MILLIS")]
    pub gateway_dedup_window_ms: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub jobs: JobsSettings,
    pub oauth: OAuthSettings,
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub mode: StoreMode,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.get().into())
    }
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub attempts: NonZeroU32,
    pub backoff: Duration,
}

impl JobsSettings {
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy {
            attempts: self.attempts.get(),
            backoff: Backoff::exponential(self.backoff),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub timeout: Duration,
    pub retries: NonZeroU32,
    pub backoff: Duration,
}

impl OAuthSettings {
    pub fn policy(&self) -> OAuthPolicy {
        OAuthPolicy {
            retries: self.retries.get(),
            backoff_base: self.backoff,
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub dedup_window: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("DEVHUB").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    rate_limit: RawRateLimitSettings,
    jobs: RawJobsSettings,
    oauth: RawOAuthSettings,
    gateway: RawGatewaySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(mode) = overrides.store_mode.as_ref() {
            self.store.mode = Some(mode.clone());
        }
        if let Some(url) = overrides.store_redis_url.as_ref() {
            self.store.redis_url = Some(url.clone());
        }
        if let Some(ttl) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(ttl);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }
        if let Some(attempts) = overrides.jobs_attempts {
            self.jobs.attempts = Some(attempts);
        }
        if let Some(backoff) = overrides.jobs_backoff_ms {
            self.jobs.backoff_ms = Some(backoff);
        }
        if let Some(timeout) = overrides.oauth_timeout_seconds {
            self.oauth.timeout_seconds = Some(timeout);
        }
        if let Some(retries) = overrides.oauth_retries {
            self.oauth.retries = Some(retries);
        }
        if let Some(backoff) = overrides.oauth_backoff_ms {
            self.oauth.backoff_ms = Some(backoff);
        }
        if let Some(window) = overrides.gateway_dedup_window_ms {
            self.gateway.dedup_window_ms = Some(window);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            rate_limit,
            jobs,
            oauth,
            gateway,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            jobs: build_jobs_settings(jobs)?,
            oauth: build_oauth_settings(oauth)?,
            gateway: build_gateway_settings(gateway)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let mode = match store.mode.as_deref() {
        None | Some("memory") => StoreMode::Memory,
        Some("redis") => StoreMode::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "store.mode",
                format!("unknown mode `{other}`, expected `memory` or `redis`"),
            ));
        }
    };

    let redis_url = store.redis_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if mode == StoreMode::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "store.redis_url",
            "required when store.mode is `redis`",
        ));
    }

    Ok(StoreSettings { mode, redis_url })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.default_ttl_seconds",
            "must be greater than zero",
        ));
    }
    Ok(CacheSettings {
        default_ttl: Duration::from_secs(ttl_secs),
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "rate_limit.max_requests")?;

    Ok(RateLimitSettings {
        window_seconds,
        max_requests,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let attempts = non_zero_u32(
        jobs.attempts.unwrap_or(DEFAULT_JOB_ATTEMPTS).into(),
        "jobs.attempts",
    )?;
    let backoff_ms = jobs.backoff_ms.unwrap_or(DEFAULT_JOB_BACKOFF_MS);
    if backoff_ms == 0 {
        return Err(LoadError::invalid(
            "jobs.backoff_ms",
            "must be greater than zero",
        ));
    }

    Ok(JobsSettings {
        attempts,
        backoff: Duration::from_millis(backoff_ms),
    })
}

fn build_oauth_settings(oauth: RawOAuthSettings) -> Result<OAuthSettings, LoadError> {
    let timeout_secs = oauth.timeout_seconds.unwrap_or(DEFAULT_OAUTH_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "oauth.timeout_seconds",
            "must be greater than zero",
        ));
    }
    let retries = non_zero_u32(
        oauth.retries.unwrap_or(DEFAULT_OAUTH_RETRIES).into(),
        "oauth.retries",
    )?;
    let backoff_ms = oauth.backoff_ms.unwrap_or(DEFAULT_OAUTH_BACKOFF_MS);
    if backoff_ms == 0 {
        return Err(LoadError::invalid(
            "oauth.backoff_ms",
            "must be greater than zero",
        ));
    }

    Ok(OAuthSettings {
        timeout: Duration::from_secs(timeout_secs),
        retries,
        backoff: Duration::from_millis(backoff_ms),
    })
}

fn build_gateway_settings(gateway: RawGatewaySettings) -> Result<GatewaySettings, LoadError> {
    let window_ms = gateway.dedup_window_ms.unwrap_or(DEFAULT_DEDUP_WINDOW_MS);
    if window_ms == 0 {
        return Err(LoadError::invalid(
            "gateway.dedup_window_ms",
            "must be greater than zero",
        ));
    }
    Ok(GatewaySettings {
        dedup_window: Duration::from_millis(window_ms),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    mode: Option<String>,
    redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    attempts: Option<u32>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOAuthSettings {
    timeout_seconds: Option<u64>,
    retries: Option<u32>,
    backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGatewaySettings {
    dedup_window_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.cache.default_ttl, Duration::from_secs(3600));
        assert_eq!(settings.rate_limit.window(), Duration::from_secs(60));
        assert_eq!(settings.jobs.attempts.get(), 3);
        assert_eq!(settings.oauth.backoff, Duration::from_millis(2000));
        assert_eq!(settings.gateway.dedup_window, Duration::from_millis(100));
        assert_eq!(settings.store.mode, StoreMode::Memory);
    }

    #[test]
    fn redis_mode_requires_a_url() {
        let mut raw = RawSettings::default();
        raw.store.mode = Some("redis".to_string());
        let err = Settings::from_raw(raw).expect_err("missing url must fail");
        assert!(matches!(err, LoadError::Invalid { key, .. } if key == "store.redis_url"));
    }

    #[test]
    fn unknown_store_mode_is_rejected() {
        let mut raw = RawSettings::default();
        raw.store.mode = Some("etcd".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["devhub"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "devhub",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--store-mode",
            "redis",
            "--store-redis-url",
            "redis://localhost:6379",
            "--gateway-dedup-window-ms",
            "250",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(serve.overrides.store_mode.as_deref(), Some("redis"));
                assert_eq!(
                    serve.overrides.store_redis_url.as_deref(),
                    Some("redis://localhost:6379")
                );
                assert_eq!(serve.overrides.gateway_dedup_window_ms, Some(250));
            }
        }
    }
}
