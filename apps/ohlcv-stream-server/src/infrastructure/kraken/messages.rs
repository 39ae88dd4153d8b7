//! Kraken REST message types.
//!
//! Every response is wrapped as `{"error": [...], "result": {...}}`. The OHLC
//! result maps the pair name to its rows plus a `last` cursor:
//!
//! ```json
//! {"error":[],"result":{"XXBTZUSD":[[1688671200,"30306.1","30306.2","30305.7","30305.7","30306.1","3.39243896",23]],"last":1688672160}}
//! ```

use std::collections::HashMap;

use serde::Deserialize;

use crate::application::ports::PluginError;
use crate::domain::market::Bar;

/// Kraken response envelope.
#[derive(Debug, Deserialize)]
pub struct KrakenResponse<T> {
    /// Error messages (empty if successful).
    #[serde(default)]
    pub error: Vec<String>,
    /// Result data (present if successful).
    pub result: Option<T>,
}

impl<T> KrakenResponse<T> {
    /// Unwrap the result, turning Kraken errors into `PluginError::Request`.
    ///
    /// # Errors
    ///
    /// Returns an error if Kraken reported one or the result is missing.
    pub fn into_result(self) -> Result<T, PluginError> {
        if let Some(first) = self.error.first() {
            return Err(PluginError::Request {
                message: format!("Kraken error: {first}"),
            });
        }
        self.result.ok_or_else(|| PluginError::Decode {
            message: "Kraken response has no result".to_string(),
        })
    }
}

/// One OHLC row: time, open, high, low, close, vwap, volume, count.
#[derive(Debug, Deserialize)]
pub struct OhlcRow(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
);

impl OhlcRow {
    /// Convert to a bar; Kraken times are seconds.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Decode` if a price or volume is not numeric.
    pub fn to_bar(&self) -> Result<Bar, PluginError> {
        Ok(Bar {
            timestamp: self.0.saturating_mul(1_000),
            open: decimal(&self.1, "open")?,
            high: decimal(&self.2, "high")?,
            low: decimal(&self.3, "low")?,
            close: decimal(&self.4, "close")?,
            volume: decimal(&self.6, "volume")?,
        })
    }
}

fn decimal(raw: &str, field: &str) -> Result<f64, PluginError> {
    raw.parse().map_err(|_| PluginError::Decode {
        message: format!("invalid {field} value {raw:?}"),
    })
}

/// Extract the bars from an OHLC result, ignoring the `last` cursor.
///
/// # Errors
///
/// Returns `PluginError::Decode` if the rows are malformed.
pub fn bars_from_result(result: HashMap<String, serde_json::Value>) -> Result<Vec<Bar>, PluginError> {
    let mut bars = Vec::new();
    for (name, value) in result {
        if name == "last" {
            continue;
        }
        let rows: Vec<OhlcRow> = serde_json::from_value(value).map_err(|e| PluginError::Decode {
            message: format!("invalid OHLC rows for {name}: {e}"),
        })?;
        for row in &rows {
            bars.push(row.to_bar()?);
        }
    }
    bars.sort_by_key(|bar| bar.timestamp);
    Ok(bars)
}
