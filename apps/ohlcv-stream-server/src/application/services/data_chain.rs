//! Data Source Chain
//!
//! Tries retrieval tiers in priority order (fastest first) and returns the
//! first non-empty answer. The chain holds no retrieval logic of its own:
//! it validates the query, sequences the tiers, normalizes what comes back,
//! and writes late answers back into the faster tiers.

use std::sync::Arc;
use std::time::Instant;

use crate::application::ports::BarSource;
use crate::domain::market::{Bar, BarQuery, SubscriptionKey};
use crate::infrastructure::metrics;

/// Upper bound on `BarQuery::limit`.
pub const DEFAULT_MAX_LIMIT: usize = 5_000;

/// Chain-level failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    /// Every tier was skipped, failed, or returned nothing.
    #[error("no data available for {key}: {reason}")]
    DataUnavailable {
        /// Requested stream.
        key: String,
        /// Last tier failure, or a summary when all tiers were empty.
        reason: String,
    },

    /// The query was rejected before any tier was called.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Ordered list of retrieval tiers.
pub struct DataSourceChain {
    tiers: Vec<Arc<dyn BarSource>>,
    max_limit: usize,
}

impl std::fmt::Debug for DataSourceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceChain")
            .field("tiers", &self.tier_names())
            .field("max_limit", &self.max_limit)
            .finish()
    }
}

impl DataSourceChain {
    /// Create a chain over `tiers`, queried in the given order.
    #[must_use]
    pub fn new(tiers: Vec<Arc<dyn BarSource>>) -> Self {
        Self {
            tiers,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }

    /// Override the largest accepted `limit`.
    #[must_use]
    pub const fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// Tier names in query order.
    #[must_use]
    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name().to_string()).collect()
    }

    /// Fetch bars for `key`, falling back through the tiers.
    ///
    /// # Errors
    ///
    /// Returns `ChainError::InvalidQuery` for a malformed query and
    /// `ChainError::DataUnavailable` when no tier produced bars.
    pub async fn fetch(&self, key: &SubscriptionKey, query: &BarQuery) -> Result<Vec<Bar>, ChainError> {
        self.validate(query)?;

        let mut last_error: Option<String> = None;

        for (index, tier) in self.tiers.iter().enumerate() {
            if !tier.supports_timeframe(key.timeframe()) {
                tracing::trace!(key = %key, tier = tier.name(), "Tier skipped for timeframe");
                continue;
            }

            let started = Instant::now();
            let result = tier.fetch(key, query).await;
            metrics::record_tier_fetch(tier.name(), started.elapsed());

            match result {
                Ok(bars) => {
                    let bars = query.normalize(bars);
                    if bars.is_empty() {
                        metrics::record_tier_outcome(tier.name(), metrics::TierOutcome::Empty);
                        tracing::trace!(key = %key, tier = tier.name(), "Tier returned no bars");
                        continue;
                    }

                    metrics::record_tier_outcome(tier.name(), metrics::TierOutcome::Hit);
                    tracing::debug!(key = %key, tier = tier.name(), bars = bars.len(), "Tier answered");
                    self.write_back(&self.tiers[..index], key, &bars).await;
                    return Ok(bars);
                }
                Err(e) => {
                    metrics::record_tier_outcome(tier.name(), metrics::TierOutcome::Error);
                    tracing::debug!(key = %key, tier = tier.name(), error = %e, "Tier failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(ChainError::DataUnavailable {
            key: key.to_string(),
            reason: last_error.unwrap_or_else(|| "all tiers returned no bars".to_string()),
        })
    }

    fn validate(&self, query: &BarQuery) -> Result<(), ChainError> {
        if query.limit == 0 {
            return Err(ChainError::InvalidQuery("limit must be at least 1".to_string()));
        }
        if query.limit > self.max_limit {
            return Err(ChainError::InvalidQuery(format!(
                "limit {} exceeds maximum {}",
                query.limit, self.max_limit
            )));
        }
        if let (Some(since), Some(before)) = (query.since, query.before)
            && since >= before
        {
            return Err(ChainError::InvalidQuery(format!(
                "since ({since}) must be earlier than before ({before})"
            )));
        }
        Ok(())
    }

    async fn write_back(&self, faster: &[Arc<dyn BarSource>], key: &SubscriptionKey, bars: &[Bar]) {
        for tier in faster {
            if let Err(e) = tier.write_back(key, bars).await {
                tracing::warn!(key = %key, tier = tier.name(), error = %e, "Write-back failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
