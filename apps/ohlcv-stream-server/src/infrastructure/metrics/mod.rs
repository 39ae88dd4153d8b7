//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: Live WebSocket client count
//! - **Poll loops**: Active loops and poll outcomes per market
//! - **Tiers**: Fetch outcomes and latency per data source tier
//! - **Deliveries**: Update envelopes sent and failed
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the existing handle.
///
/// # Errors
///
/// Returns `BuildError` if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "ohlcv_stream_connections",
        "Number of live WebSocket client connections"
    );
    describe_gauge!(
        "ohlcv_stream_active_loops",
        "Number of running poll loops (one per subscription key)"
    );

    describe_counter!(
        "ohlcv_stream_polls_total",
        "Poll cycles by market and outcome"
    );
    describe_counter!(
        "ohlcv_stream_tier_fetches_total",
        "Data source tier fetches by tier and outcome"
    );
    describe_histogram!(
        "ohlcv_stream_tier_fetch_seconds",
        "Data source tier fetch latency"
    );

    describe_counter!(
        "ohlcv_stream_deliveries_total",
        "Update envelopes successfully queued to clients"
    );
    describe_counter!(
        "ohlcv_stream_delivery_failures_total",
        "Update envelopes that failed to reach a client"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for one tier fetch.
#[derive(Debug, Clone, Copy)]
pub enum TierOutcome {
    /// Non-empty answer.
    Hit,
    /// Answered with nothing in range.
    Empty,
    /// Tier failed.
    Error,
}

impl TierOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

/// Outcome label for one poll cycle.
#[derive(Debug, Clone, Copy)]
pub enum PollOutcome {
    /// Fetch succeeded.
    Ok,
    /// Every tier came back empty or failed.
    Unavailable,
    /// Chain rejected the query.
    Error,
    /// The cycle panicked.
    Panic,
}

impl PollOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Unavailable => "unavailable",
            Self::Error => "error",
            Self::Panic => "panic",
        }
    }
}

/// Update the live connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!("ohlcv_stream_connections").set(count as f64);
}

/// Update the running poll loop count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_loops(count: usize) {
    gauge!("ohlcv_stream_active_loops").set(count as f64);
}

/// Record one poll cycle.
pub fn record_poll(market: &str, outcome: PollOutcome) {
    counter!(
        "ohlcv_stream_polls_total",
        "market" => market.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record the outcome of one tier fetch.
pub fn record_tier_outcome(tier: &str, outcome: TierOutcome) {
    counter!(
        "ohlcv_stream_tier_fetches_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record tier fetch latency.
pub fn record_tier_fetch(tier: &str, duration: Duration) {
    histogram!(
        "ohlcv_stream_tier_fetch_seconds",
        "tier" => tier.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the result of one broadcast.
pub fn record_deliveries(sent: usize, failed: usize) {
    counter!("ohlcv_stream_deliveries_total").increment(sent as u64);
    if failed > 0 {
        counter!("ohlcv_stream_delivery_failures_total").increment(failed as u64);
    }
}

// =============================================================================
// Tests
// =============================================================================
