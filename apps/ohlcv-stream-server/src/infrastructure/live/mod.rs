//! Live Tier
//!
//! Last tier of the data source chain: resolves the market plugin for a key
//! and asks it for bars. Plugin failures become tier failures, so the chain
//! reports them as data unavailable instead of tearing the poll loop down.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{BarSource, PluginError, SourceError};
use crate::application::services::PluginRegistry;
use crate::domain::market::{Bar, BarQuery, SubscriptionKey, Timeframe};

/// Bar source backed by the plugin registry.
#[derive(Debug, Clone)]
pub struct LiveSource {
    plugins: Arc<PluginRegistry>,
}

impl LiveSource {
    /// Tier name reported to the chain.
    pub const NAME: &'static str = "live";

    /// Create a live tier over `plugins`.
    #[must_use]
    pub const fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins }
    }

    fn unavailable(error: &PluginError) -> SourceError {
        SourceError::Unavailable {
            tier: Self::NAME.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl BarSource for LiveSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    // Timeframe support is checked per plugin once the market is known.
    fn supports_timeframe(&self, _timeframe: Timeframe) -> bool {
        true
    }

    async fn fetch(&self, key: &SubscriptionKey, query: &BarQuery) -> Result<Vec<Bar>, SourceError> {
        let plugin = self
            .plugins
            .load(key.market())
            .await
            .map_err(|e| Self::unavailable(&e))?;

        if !plugin.supports_timeframe(key.timeframe()) {
            return Err(SourceError::Unsupported {
                tier: Self::NAME.to_string(),
                key: key.to_string(),
            });
        }

        plugin
            .fetch_bars(key.provider(), key.symbol(), key.timeframe(), query)
            .await
            .map(|bars| query.normalize(bars))
            .map_err(|e| Self::unavailable(&e))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::MarketPlugin;

    struct StubPlugin {
        bars: Vec<Bar>,
        requests: Mutex<Vec<(String, String, Timeframe)>>,
    }

    #[async_trait]
    impl MarketPlugin for StubPlugin {
        fn name(&self) -> &str {
            "stub"
        }

        fn supports_timeframe(&self, timeframe: Timeframe) -> bool {
            timeframe != Timeframe::OneWeek
        }

        async fn fetch_bars(
            &self,
            provider: &str,
            symbol: &str,
            timeframe: Timeframe,
            _query: &BarQuery,
        ) -> Result<Vec<Bar>, PluginError> {
            self.requests
                .lock()
                .push((provider.to_string(), symbol.to_string(), timeframe));
            Ok(self.bars.clone())
        }
    }

    fn bar(timestamp: i64) -> Bar {
        Bar {
            timestamp,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    fn registry_with(plugin: Arc<StubPlugin>) -> Arc<PluginRegistry> {
        let registry = Arc::new(PluginRegistry::new());
        registry.register_instance("stub", plugin);
        registry
    }

    #[tokio::test]
    async fn routes_by_market_and_passes_provider_symbol() {
        let plugin = Arc::new(StubPlugin {
            bars: vec![bar(2), bar(1)],
            requests: Mutex::new(vec![]),
        });
        let live = LiveSource::new(registry_with(Arc::clone(&plugin)));
        let key = SubscriptionKey::new("stub", "venue", "ABC", Timeframe::OneMinute).unwrap();

        let bars = live.fetch(&key, &BarQuery::latest(10)).await.unwrap();

        assert_eq!(bars, vec![bar(1), bar(2)]);
        assert_eq!(
            plugin.requests.lock().as_slice(),
            &[("venue".to_string(), "ABC".to_string(), Timeframe::OneMinute)]
        );
    }

    #[tokio::test]
    async fn unknown_market_is_unavailable() {
        let live = LiveSource::new(Arc::new(PluginRegistry::new()));
        let key = SubscriptionKey::new("nowhere", "x", "ABC", Timeframe::OneMinute).unwrap();

        let err = live.fetch(&key, &BarQuery::latest(10)).await.unwrap_err();

        assert!(matches!(err, SourceError::Unavailable { tier, message } if tier == "live" && message.contains("nowhere")));
    }

    #[tokio::test]
    async fn unsupported_timeframe_is_reported() {
        let plugin = Arc::new(StubPlugin {
            bars: vec![],
            requests: Mutex::new(vec![]),
        });
        let live = LiveSource::new(registry_with(Arc::clone(&plugin)));
        let key = SubscriptionKey::new("stub", "venue", "ABC", Timeframe::OneWeek).unwrap();

        let err = live.fetch(&key, &BarQuery::latest(10)).await.unwrap_err();

        assert!(matches!(err, SourceError::Unsupported { .. }));
        assert!(plugin.requests.lock().is_empty());
    }
}
