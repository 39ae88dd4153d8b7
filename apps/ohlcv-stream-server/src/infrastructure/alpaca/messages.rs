//! Alpaca Market Data Message Types
//!
//! Wire format for the historical stock bars endpoint
//! (`GET /v2/stocks/{symbol}/bars`).
//!
//! # Wire Format (JSON)
//! ```json
//! {
//!   "bars": [
//!     {"t": "2021-02-22T19:15:00Z", "o": 388.985, "h": 389.13, "l": 388.975,
//!      "c": 389.12, "v": 49378, "n": 461, "vw": 389.062639}
//!   ],
//!   "symbol": "SPY",
//!   "next_page_token": null
//! }
//! ```
//!
//! # References
//!
//! - [Historical Bars](https://docs.alpaca.markets/reference/stockbarsingle-1)

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::market::Bar;

/// Bars page for one symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
    /// Bars in the page; `null` when there are none.
    #[serde(default)]
    pub bars: Option<Vec<StockBar>>,

    /// Ticker symbol.
    #[serde(default)]
    pub symbol: String,

    /// Cursor for the next page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One historical stock bar.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StockBar {
    /// Bar timestamp (start of bar period)
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,

    /// Open price
    #[serde(rename = "o")]
    pub open: f64,

    /// High price
    #[serde(rename = "h")]
    pub high: f64,

    /// Low price
    #[serde(rename = "l")]
    pub low: f64,

    /// Close price
    #[serde(rename = "c")]
    pub close: f64,

    /// Volume (shares)
    #[serde(rename = "v")]
    pub volume: f64,

    /// Number of trades in bar
    #[serde(rename = "n", default)]
    pub trade_count: u64,

    /// Volume-weighted average price (VWAP)
    #[serde(rename = "vw", default)]
    pub vwap: Option<f64>,
}

impl From<&StockBar> for Bar {
    fn from(bar: &StockBar) -> Self {
        Self {
            timestamp: bar.timestamp.timestamp_millis(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

impl BarsResponse {
    /// Domain bars in timestamp order.
    #[must_use]
    pub fn into_bars(self) -> Vec<Bar> {
        let mut bars: Vec<Bar> = self
            .bars
            .unwrap_or_default()
            .iter()
            .map(Bar::from)
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);
        bars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bars_page() {
        let json = r#"{
            "bars": [
                {"t":"2021-02-22T19:16:00Z","o":389.12,"h":389.2,"l":389.0,"c":389.1,"v":1200,"n":20,"vw":389.1},
                {"t":"2021-02-22T19:15:00Z","o":388.985,"h":389.13,"l":388.975,"c":389.12,"v":49378,"n":461,"vw":389.062639}
            ],
            "symbol": "SPY",
            "next_page_token": null
        }"#;

        let response: BarsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.symbol, "SPY");

        let bars = response.into_bars();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 1_614_021_300_000);
        assert!((bars[0].volume - 49_378.0).abs() < f64::EPSILON);
    }

    #[test]
    fn null_bars_is_empty() {
        let response: BarsResponse =
            serde_json::from_str(r#"{"bars":null,"symbol":"SPY","next_page_token":null}"#).unwrap();
        assert!(response.into_bars().is_empty());
    }
}
