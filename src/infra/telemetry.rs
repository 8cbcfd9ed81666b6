use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "devhub_cache_hit_total",
            Unit::Count,
            "Total number of cache-aside hits."
        );
        describe_counter!(
            "devhub_cache_miss_total",
            Unit::Count,
            "Total number of cache-aside misses."
        );
        describe_counter!(
            "devhub_cache_invalidate_total",
            Unit::Count,
            "Total number of cache entries dropped by the invalidation router."
        );
        describe_counter!(
            "devhub_rate_limited_total",
            Unit::Count,
            "Total number of requests rejected by the rate limiter."
        );
        describe_counter!(
            "devhub_jobs_completed_total",
            Unit::Count,
            "Total number of jobs that completed, per queue."
        );
        describe_counter!(
            "devhub_jobs_retried_total",
            Unit::Count,
            "Total number of job retries scheduled, per queue."
        );
        describe_counter!(
            "devhub_jobs_failed_total",
            Unit::Count,
            "Total number of jobs that exhausted their attempts, per queue."
        );
        describe_counter!(
            "devhub_gateway_broadcast_total",
            Unit::Count,
            "Total number of websocket deliveries fanned out by the gateway."
        );
        describe_counter!(
            "devhub_gateway_dedup_dropped_total",
            Unit::Count,
            "Total number of deliveries suppressed by the dedup window."
        );
    });
}
