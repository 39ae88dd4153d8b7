//! Bar Source Port (Driven Port)
//!
//! Uniform fetch contract for one retrieval tier of the data source chain
//! (in-memory cache, persisted aggregate store, live upstream).

use async_trait::async_trait;

use crate::domain::market::{Bar, BarQuery, SubscriptionKey, Timeframe};

/// Tier-level fetch failure. The chain treats it as "fall through".
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The tier could not reach its backing store or upstream.
    #[error("{tier} unavailable: {message}")]
    Unavailable {
        /// Tier name.
        tier: String,
        /// Error details.
        message: String,
    },

    /// The tier cannot serve this stream at all.
    #[error("{tier} does not serve {key}")]
    Unsupported {
        /// Tier name.
        tier: String,
        /// Requested stream.
        key: String,
    },
}

/// One retrieval tier.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Tier name used in logs and metrics.
    fn name(&self) -> &str;

    /// Whether this tier can serve bars of `timeframe`.
    fn supports_timeframe(&self, timeframe: Timeframe) -> bool;

    /// Fetch bars for `key` inside `query`, ordered by timestamp.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` when the tier cannot answer; the chain moves on.
    async fn fetch(&self, key: &SubscriptionKey, query: &BarQuery) -> Result<Vec<Bar>, SourceError>;

    /// Store bars that a slower tier produced. Tiers that cannot cache ignore this.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the tier failed to store the bars.
    async fn write_back(&self, _key: &SubscriptionKey, _bars: &[Bar]) -> Result<(), SourceError> {
        Ok(())
    }
}
