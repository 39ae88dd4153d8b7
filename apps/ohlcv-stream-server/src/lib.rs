#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! OHLCV Stream Server - Live Bar Distribution
//!
//! A WebSocket service that keeps exactly one polling loop per stream
//! (market, provider, symbol, timeframe), fetches bars through a tiered data
//! source chain, and fans every new bar out to all clients subscribed to
//! that stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types with no I/O
//!   - `market`: Subscription keys, timeframes, bars, fetch windows
//!   - `subscription`: Listener bookkeeping per key
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Bar sources, market plugins, client connections
//!   - `services`: Subscription manager, data source chain, plugin registry,
//!     key locks, connection registry, broadcast dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kraken` / `alpaca`: Live market plugins over REST
//!   - `cache` / `live`: Chain tiers
//!   - `websocket`: Client endpoint
//!   - `config`: Settings and application state
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  ┌──────────────┐    ┌──────────────┐
//! Client ──ws────► │ Subscription │──► │  Poll loop   │  (one per key,
//! Client ──ws────► │   Manager    │    │  + key lock  │   single writer)
//!                  └──────────────┘    └──────┬───────┘
//!                                             ▼
//!                         ┌────────── Data Source Chain ──────────┐
//!                         │ memory cache → live (plugin registry) │
//!                         └───────────────────┬───────────────────┘
//!                                             ▼ new bars
//!                                   Broadcast Dispatcher ──► listeners
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core bar types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Bar, BarQuery, KeyError, SubscriptionKey, Timeframe};
pub use domain::subscription::{ConnectionId, ListenerTable};

// Ports
pub use application::ports::{
    BarSource, CLOSE_GOING_AWAY, Connection, DeliveryError, MarketPlugin, PluginError, SourceError,
};

// Services
pub use application::services::{
    BroadcastDispatcher, ChainError, ConnectionRegistry, DataSourceChain, KeyLockManager,
    PluginFactory, PluginRegistry, PollSettings, SubscriptionManager, SubscriptionStats,
};

// Infrastructure config
pub use infrastructure::config::{AppState, ConfigError, Credentials, ServerConfig};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError};
pub use infrastructure::websocket::{StreamServer, StreamServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
