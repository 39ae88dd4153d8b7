//! Market Plugin Port (Driven Port)
//!
//! Contract for live-source adapters. One plugin serves one market; the
//! provider (exchange or feed) is passed per request.

use async_trait::async_trait;

use crate::domain::market::{Bar, BarQuery, Timeframe};

/// Plugin error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// No instance or factory registered under this market name.
    #[error("Plugin not found: {name}")]
    NotFound {
        /// Requested market name.
        name: String,
    },

    /// Deferred construction failed (typically missing credentials).
    #[error("Plugin {name} failed to initialize: {reason}")]
    InitFailed {
        /// Market name.
        name: String,
        /// Failure details.
        reason: String,
    },

    /// The plugin does not know this provider.
    #[error("Provider {provider} is not supported by {plugin}")]
    UnsupportedProvider {
        /// Plugin name.
        plugin: String,
        /// Requested provider.
        provider: String,
    },

    /// The plugin cannot produce bars of this timeframe.
    #[error("Timeframe {timeframe} is not supported by {plugin}")]
    UnsupportedTimeframe {
        /// Plugin name.
        plugin: String,
        /// Requested timeframe.
        timeframe: Timeframe,
    },

    /// Upstream request failed.
    #[error("Upstream request failed: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// Upstream answered with a payload we could not decode.
    #[error("Failed to decode upstream response: {message}")]
    Decode {
        /// Error details.
        message: String,
    },
}

/// Live-source adapter for one market.
#[async_trait]
pub trait MarketPlugin: Send + Sync {
    /// Market name this plugin is registered under.
    fn name(&self) -> &str;

    /// Whether the upstream offers bars of `timeframe`.
    fn supports_timeframe(&self, timeframe: Timeframe) -> bool;

    /// Fetch bars from the upstream, ordered by timestamp.
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the provider or timeframe is unsupported or
    /// the upstream call fails.
    async fn fetch_bars(
        &self,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        query: &BarQuery,
    ) -> Result<Vec<Bar>, PluginError>;
}
