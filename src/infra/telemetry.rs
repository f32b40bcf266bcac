use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
            "taccuino_cache_hit_total",
            Unit::Count,
            "Total number of entity cache hits."
        );
        describe_counter!(
            "taccuino_cache_miss_total",
            Unit::Count,
            "Total number of entity cache misses."
        );
        describe_counter!(
            "taccuino_counter_record_dropped_total",
            Unit::Count,
            "Total number of view/like events dropped after a cache fault."
        );
        describe_counter!(
            "taccuino_counter_sync_cycles_total",
            Unit::Count,
            "Total number of completed counter sync cycles."
        );
        describe_counter!(
            "taccuino_counter_sync_applied_total",
            Unit::Count,
            "Total number of notes whose counter deltas were durably applied."
        );
        describe_counter!(
            "taccuino_counter_sync_requeued_total",
            Unit::Count,
            "Total number of notes requeued for a later sync cycle after a fault."
        );
        describe_histogram!(
            "taccuino_counter_sync_cycle_ms",
            Unit::Milliseconds,
            "Counter sync cycle latency in milliseconds."
        );
        describe_counter!(
            "taccuino_rate_limit_denied_total",
            Unit::Count,
            "Total number of requests denied by the rate limiter."
        );
        describe_counter!(
            "taccuino_rate_limit_fail_open_total",
            Unit::Count,
            "Total number of rate limit checks that failed open after a cache fault."
        );
    });
}
