//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alpaca market data plugin (`alpaca` market).
pub mod alpaca;

/// In-memory bar cache tier.
pub mod cache;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Shared HTTP client plumbing for the plugins.
pub mod http;

/// Kraken public OHLC plugin (`crypto` market).
pub mod kraken;

/// Live tier backed by the plugin registry.
pub mod live;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket subscription endpoint.
pub mod websocket;
