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

pub(crate) fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pagestash_page_hit_total",
            Unit::Count,
            "Total number of requests served from a stored page."
        );
        describe_counter!(
            "pagestash_page_miss_total",
            Unit::Count,
            "Total number of requests rendered because no page was stored."
        );
        describe_counter!(
            "pagestash_page_store_total",
            Unit::Count,
            "Total number of pages written to the page cache."
        );
        describe_counter!(
            "pagestash_page_store_skipped_total",
            Unit::Count,
            "Total number of rendered pages that were not stored."
        );
        describe_counter!(
            "pagestash_asset_minified_total",
            Unit::Count,
            "Total number of assets minified and written to the cache root."
        );
        describe_counter!(
            "pagestash_asset_reused_total",
            Unit::Count,
            "Total number of asset references served by an existing minified file."
        );
        describe_counter!(
            "pagestash_asset_fallback_total",
            Unit::Count,
            "Total number of asset references left pointing at the original file."
        );
        describe_counter!(
            "pagestash_invalidation_total",
            Unit::Count,
            "Total number of cache invalidations by scope."
        );
        describe_histogram!(
            "pagestash_rewrite_ms",
            Unit::Milliseconds,
            "HTML rewrite latency in milliseconds."
        );
    });
}
