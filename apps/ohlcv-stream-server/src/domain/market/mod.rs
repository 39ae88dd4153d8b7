//! Market Data Types
//!
//! Core value types for bar streaming: the subscription key that identifies
//! a stream, the timeframe of its bars, the OHLCV bar itself, and the query
//! window used when fetching bars from a source.
//!
//! All types here are pure Rust with serialization support.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building keys from client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Timeframe string is not one of the supported intervals.
    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// A required key component was empty.
    #[error("{0} cannot be empty")]
    EmptyComponent(&'static str),
}

// =============================================================================
// Timeframe
// =============================================================================

/// Bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    /// One minute.
    OneMinute,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// Four hours.
    FourHours,
    /// One day.
    OneDay,
    /// One week.
    OneWeek,
}

impl Timeframe {
    /// Get all supported timeframes, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::OneMinute,
            Self::FiveMinutes,
            Self::FifteenMinutes,
            Self::ThirtyMinutes,
            Self::OneHour,
            Self::FourHours,
            Self::OneDay,
            Self::OneWeek,
        ]
    }

    /// Get the wire form (`1m`, `1h`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
            Self::OneWeek => "1w",
        }
    }

    /// Length of one bar in minutes.
    #[must_use]
    pub const fn minutes(&self) -> u64 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::ThirtyMinutes => 30,
            Self::OneHour => 60,
            Self::FourHours => 240,
            Self::OneDay => 1_440,
            Self::OneWeek => 10_080,
        }
    }

    /// Length of one bar.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.minutes() * 60)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(normalized))
            .ok_or_else(|| KeyError::UnsupportedTimeframe(s.to_string()))
    }
}

impl Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Subscription Key
// =============================================================================

/// Identity of one live bar stream.
///
/// Keys compare and hash by value, so two subscriptions built from the same
/// components always share the same poll loop and the same key lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    market: String,
    provider: String,
    symbol: String,
    timeframe: Timeframe,
}

impl SubscriptionKey {
    /// Build a key, normalizing market and provider to lowercase.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::EmptyComponent` if market, provider or symbol is blank.
    pub fn new(
        market: &str,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Self, KeyError> {
        let market = market.trim().to_lowercase();
        let provider = provider.trim().to_lowercase();
        let symbol = symbol.trim().to_string();

        if market.is_empty() {
            return Err(KeyError::EmptyComponent("market"));
        }
        if provider.is_empty() {
            return Err(KeyError::EmptyComponent("provider"));
        }
        if symbol.is_empty() {
            return Err(KeyError::EmptyComponent("symbol"));
        }

        Ok(Self {
            market,
            provider,
            symbol,
            timeframe,
        })
    }

    /// Market name (`crypto`, `alpaca`, ...).
    #[must_use]
    pub fn market(&self) -> &str {
        &self.market
    }

    /// Provider within the market (exchange or feed).
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Instrument symbol as the client sent it.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Bar interval.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.market, self.provider, self.symbol, self.timeframe
        )
    }
}

// =============================================================================
// Bar
// =============================================================================

/// One OHLCV bar. `timestamp` is the bar open time in epoch milliseconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time, epoch milliseconds.
    pub timestamp: i64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

/// Keep the bars strictly newer than `watermark`, in timestamp order.
///
/// With no watermark every bar is new.
#[must_use]
pub fn bars_after(bars: &[Bar], watermark: Option<i64>) -> Vec<Bar> {
    let mut fresh: Vec<Bar> = bars
        .iter()
        .filter(|bar| watermark.is_none_or(|mark| bar.timestamp > mark))
        .copied()
        .collect();
    fresh.sort_by_key(|bar| bar.timestamp);
    fresh
}

// =============================================================================
// Bar Query
// =============================================================================

/// Fetch window: `since` inclusive, `before` exclusive, at most `limit` bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarQuery {
    /// Lower bound (inclusive), epoch milliseconds.
    pub since: Option<i64>,
    /// Upper bound (exclusive), epoch milliseconds.
    pub before: Option<i64>,
    /// Maximum number of bars to return.
    pub limit: usize,
}

impl BarQuery {
    /// Query for the most recent `limit` bars.
    #[must_use]
    pub const fn latest(limit: usize) -> Self {
        Self {
            since: None,
            before: None,
            limit,
        }
    }

    /// Query for bars at or after `since`.
    #[must_use]
    pub const fn since(since: Option<i64>, limit: usize) -> Self {
        Self {
            since,
            before: None,
            limit,
        }
    }

    /// Whether `timestamp` falls inside the window.
    #[must_use]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.since.is_none_or(|since| timestamp >= since)
            && self.before.is_none_or(|before| timestamp < before)
    }

    /// Sort, de-duplicate, clip to the window and keep the newest `limit` bars.
    #[must_use]
    pub fn normalize(&self, mut bars: Vec<Bar>) -> Vec<Bar> {
        bars.retain(|bar| self.contains(bar.timestamp));
        bars.sort_by_key(|bar| bar.timestamp);
        bars.dedup_by_key(|bar| bar.timestamp);
        if bars.len() > self.limit {
            bars.drain(..bars.len() - self.limit);
        }
        bars
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use test_case::test_case;

    use super::*;

    fn bar(timestamp: i64) -> Bar {
        Bar {
            timestamp,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }
    }

    #[test_case("1m", Timeframe::OneMinute)]
    #[test_case("5M", Timeframe::FiveMinutes)]
    #[test_case(" 1h ", Timeframe::OneHour)]
    #[test_case("1d", Timeframe::OneDay)]
    #[test_case("1w", Timeframe::OneWeek)]
    fn timeframe_parses(raw: &str, expected: Timeframe) {
        assert_eq!(raw.parse::<Timeframe>().unwrap(), expected);
    }

    #[test]
    fn timeframe_rejects_unknown() {
        let err = "7m".parse::<Timeframe>().unwrap_err();
        assert_eq!(err, KeyError::UnsupportedTimeframe("7m".to_string()));
        assert_eq!(err.to_string(), "Unsupported timeframe: 7m");
    }

    #[test]
    fn timeframe_round_trips_through_display() {
        for tf in Timeframe::all() {
            assert_eq!(tf.to_string().parse::<Timeframe>().unwrap(), *tf);
        }
    }

    #[test]
    fn timeframe_duration() {
        assert_eq!(Timeframe::OneMinute.duration(), Duration::from_secs(60));
        assert_eq!(Timeframe::FourHours.duration(), Duration::from_secs(4 * 3600));
    }

    #[test]
    fn keys_with_same_fields_alias() {
        let a = SubscriptionKey::new("crypto", "kraken", "BTC/USD", Timeframe::OneMinute).unwrap();
        let b = SubscriptionKey::new("CRYPTO", "Kraken", "BTC/USD", Timeframe::OneMinute).unwrap();

        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn keys_differ_by_timeframe() {
        let a = SubscriptionKey::new("crypto", "kraken", "BTC/USD", Timeframe::OneMinute).unwrap();
        let b = SubscriptionKey::new("crypto", "kraken", "BTC/USD", Timeframe::FiveMinutes).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn key_rejects_blank_symbol() {
        let err = SubscriptionKey::new("crypto", "kraken", "  ", Timeframe::OneMinute).unwrap_err();
        assert_eq!(err, KeyError::EmptyComponent("symbol"));
    }

    #[test]
    fn key_display() {
        let key = SubscriptionKey::new("crypto", "kraken", "BTC/USD", Timeframe::OneHour).unwrap();
        assert_eq!(key.to_string(), "crypto:kraken:BTC/USD:1h");
    }

    #[test]
    fn bars_after_filters_strictly_newer() {
        let bars = vec![bar(1060), bar(940), bar(1000)];
        let fresh = bars_after(&bars, Some(1000));
        assert_eq!(fresh, vec![bar(1060)]);
    }

    #[test]
    fn bars_after_without_watermark_returns_all_sorted() {
        let bars = vec![bar(1060), bar(1000)];
        let fresh = bars_after(&bars, None);
        assert_eq!(fresh, vec![bar(1000), bar(1060)]);
    }

    #[test]
    fn query_normalize_clips_and_dedups() {
        let query = BarQuery {
            since: Some(1000),
            before: Some(1180),
            limit: 10,
        };
        let bars = vec![bar(1180), bar(1060), bar(1000), bar(940), bar(1060)];

        let normalized = query.normalize(bars);

        assert_eq!(normalized, vec![bar(1000), bar(1060)]);
    }

    #[test]
    fn query_normalize_keeps_newest_when_over_limit() {
        let query = BarQuery::latest(2);
        let normalized = query.normalize(vec![bar(1), bar(3), bar(2)]);
        assert_eq!(normalized, vec![bar(2), bar(3)]);
    }

    #[test]
    fn bar_serializes_with_epoch_millis() {
        let json = serde_json::to_value(bar(1_700_000_000_000)).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(json["volume"], 10.0);
    }
}
