//! OHLCV Stream Server Binary
//!
//! Starts the WebSocket bar stream server and its health endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ohlcv-stream-server
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `STREAM_SERVER_WS_PORT`: WebSocket port (default: 8080)
//! - `STREAM_SERVER_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `POLL_MIN_INTERVAL_MS` / `POLL_MAX_INTERVAL_MS`: Poll interval clamp (default: 1000 / 30000)
//! - `POLL_HISTORY_LIMIT`: Bars requested per poll, 1 to 5000 (default: 500)
//! - `POLL_BACKOFF_MAX_MS`: Longest backoff after failures (default: 60000)
//! - `CACHE_TTL_MS`: Cache freshness window (default: 500)
//! - `CACHE_MAX_BARS_PER_KEY`: Cache retention per key (default: 2000)
//! - `DELIVERY_SEND_TIMEOUT_MS`: Per-client send timeout (default: 2000)
//! - `DELIVERY_QUEUE_CAPACITY`: Per-client outbound queue (default: 256)
//! - `HEARTBEAT_INTERVAL_SECS` / `HEARTBEAT_TIMEOUT_SECS`: Ping cadence and idle limit (default: 30 / 90)
//! - `KRAKEN_BASE_URL`: Kraken REST base (default: <https://api.kraken.com>)
//! - `ALPACA_DATA_URL`: Alpaca market data base (default: <https://data.alpaca.markets>)
//! - `ALPACA_KEY` / `ALPACA_SECRET`: Needed only once a client subscribes to `alpaca`
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ohlcv-stream-server)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use ohlcv_stream_server::infrastructure::telemetry;
use ohlcv_stream_server::{AppState, HealthServer, ServerConfig, StreamServer, init_metrics};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting OHLCV Stream Server");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install Prometheus recorder")?;

    let config = ServerConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let ws_port = config.server.ws_port;
    let health_port = config.server.health_port;
    let state = Arc::new(AppState::init(config).context("failed to initialize plugins")?);

    let health_server = HealthServer::new(health_port, Arc::clone(&state), state.cancel_token().clone());
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let stream_server = StreamServer::new(ws_port, Arc::clone(&state), state.cancel_token().clone());
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream_server.run().await {
            tracing::error!(error = %e, "Stream server error");
        }
    });

    tracing::info!("Stream server ready");

    await_shutdown().await;

    state.shutdown().await;
    let _ = tokio::join!(health_task, stream_task);

    tracing::info!("Stream server stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        history_limit = config.poll.history_limit,
        cache_ttl_ms = u64::try_from(config.cache.ttl.as_millis()).unwrap_or(u64::MAX),
        "Configuration loaded"
    );
    tracing::debug!(
        kraken_base_url = %config.sources.kraken_base_url,
        alpaca_data_url = %config.sources.alpaca_data_url,
        alpaca_credentials = config.sources.alpaca_credentials().is_ok(),
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
