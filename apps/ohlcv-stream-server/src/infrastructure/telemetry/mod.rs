//! OpenTelemetry Tracing Integration
//!
//! Configures OpenTelemetry with OTLP exporter for distributed tracing.
//! Integrates with OpenObserve or any OTLP-compatible backend.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "false" to disable tracing (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: ohlcv-stream-server)
//!
//! # Usage
//!
//! ```ignore
//! use ohlcv_stream_server::infrastructure::telemetry;
//!
//! // Initialize at startup (returns guard that must be kept alive)
//! let _guard = telemetry::init();
//!
//! // Add spans to your code
//! #[tracing::instrument]
//! fn poll_key() {
//!     tracing::info!("Polling key");
//! }
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "ohlcv-stream-server";

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether OpenTelemetry is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("OTEL_ENABLED").is_none_or(|v| !v.trim().eq_ignore_ascii_case("false"));
        let otlp_endpoint =
            lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());
        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Initialize telemetry with default configuration from environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
/// When the guard is dropped, OpenTelemetry will be properly shut down.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

#[allow(clippy::expect_used)]
fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env()
        .add_directive(
            "ohlcv_stream_server=info"
                .parse()
                .expect("static directive 'ohlcv_stream_server=info' is valid"),
        )
        .add_directive(
            "reqwest=warn"
                .parse()
                .expect("static directive 'reqwest=warn' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
}

fn tracer_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, ExporterBuildError> {
    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build())
}

/// Initialize telemetry with custom configuration.
///
/// If the OTLP exporter cannot be built, logging still goes to stdout and
/// the failure is reported once the subscriber is up.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let provider = if config.enabled {
        Some(tracer_provider(&config))
    } else {
        None
    };

    match provider {
        Some(Ok(provider)) => {
            let tracer = provider.tracer(config.service_name.clone());
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
            tracing::debug!(endpoint = %config.otlp_endpoint, "OpenTelemetry export enabled");

            TelemetryGuard {
                tracer_provider: Some(provider),
            }
        }
        other => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt_layer)
                .init();
            if let Some(Err(e)) = other {
                tracing::warn!(error = %e, endpoint = %config.otlp_endpoint, "OTLP exporter unavailable, logging to stdout only");
            }

            TelemetryGuard {
                tracer_provider: None,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
