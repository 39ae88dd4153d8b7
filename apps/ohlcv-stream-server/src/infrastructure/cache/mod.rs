//! In-Memory Bar Cache
//!
//! First tier of the data source chain. Holds the most recent bars per key
//! as written back by slower tiers and answers fetches only while the entry
//! is fresh, so a stale cache never hides new bars from the live tier.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{BarSource, SourceError};
use crate::domain::market::{Bar, BarQuery, SubscriptionKey, Timeframe};
use crate::infrastructure::config::CacheSettings;

struct Entry {
    bars: BTreeMap<i64, Bar>,
    updated_at: Instant,
}

/// Bounded, TTL-gated bar cache keyed by subscription key.
pub struct MemoryBarCache {
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    ttl: Duration,
    max_bars_per_key: usize,
}

impl std::fmt::Debug for MemoryBarCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBarCache")
            .field("keys", &self.len())
            .field("ttl", &self.ttl)
            .field("max_bars_per_key", &self.max_bars_per_key)
            .finish()
    }
}

impl MemoryBarCache {
    /// Tier name reported to the chain.
    pub const NAME: &'static str = "memory-cache";

    /// Create an empty cache.
    #[must_use]
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: settings.ttl,
            max_bars_per_key: settings.max_bars_per_key.max(1),
        }
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Bars held for `key`, regardless of freshness.
    #[must_use]
    pub fn bars_for(&self, key: &SubscriptionKey) -> Vec<Bar> {
        self.entries
            .lock()
            .get(key)
            .map(|entry| entry.bars.values().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let dropped = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        tracing::debug!(keys = dropped, "Bar cache cleared");
    }
}

#[async_trait]
impl BarSource for MemoryBarCache {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports_timeframe(&self, _timeframe: Timeframe) -> bool {
        true
    }

    async fn fetch(&self, key: &SubscriptionKey, query: &BarQuery) -> Result<Vec<Bar>, SourceError> {
        let bars: Vec<Bar> = {
            let entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.updated_at.elapsed() <= self.ttl => {
                    entry.bars.values().copied().collect()
                }
                _ => return Ok(vec![]),
            }
        };
        Ok(query.normalize(bars))
    }

    async fn write_back(&self, key: &SubscriptionKey, bars: &[Bar]) -> Result<(), SourceError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
            bars: BTreeMap::new(),
            updated_at: Instant::now(),
        });

        for bar in bars {
            entry.bars.insert(bar.timestamp, *bar);
        }
        while entry.bars.len() > self.max_bars_per_key {
            entry.bars.pop_first();
        }
        entry.updated_at = Instant::now();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
