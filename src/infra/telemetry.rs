use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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
            "medtrack_cache_hit_total",
            Unit::Count,
            "Total number of read-cache hits."
        );
        describe_counter!(
            "medtrack_cache_miss_total",
            Unit::Count,
            "Total number of read-cache misses, including expired entries."
        );
        describe_counter!(
            "medtrack_cache_skip_total",
            Unit::Count,
            "Responses not admitted to the cache, labelled by reason."
        );
        describe_counter!(
            "medtrack_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries removed by invalidation."
        );
        describe_gauge!(
            "medtrack_cache_event_queue_len",
            Unit::Count,
            "Current number of pending cache events in the queue."
        );
        describe_counter!(
            "medtrack_query_coalesced_total",
            Unit::Count,
            "Reads that joined an identical in-flight request."
        );
        describe_histogram!(
            "medtrack_export_ms",
            Unit::Milliseconds,
            "Bulk export latency in milliseconds."
        );
        describe_counter!(
            "medtrack_export_omitted_total",
            Unit::Count,
            "Export entries omitted because rendering failed."
        );
        describe_histogram!(
            "medtrack_sign_ms",
            Unit::Milliseconds,
            "Mass-signing latency in milliseconds."
        );
    });
}
