//! Alpaca Market Plugin
//!
//! Live source for the `alpaca` market backed by the Alpaca market data v2
//! historical stock bars endpoint. The provider selects the data feed
//! (`iex` or `sip`).
//!
//! Credentials are required, so the plugin is registered as a factory and
//! only built when a client first subscribes to the market.

pub mod messages;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use self::messages::BarsResponse;
use crate::application::ports::{MarketPlugin, PluginError};
use crate::application::services::PluginFactory;
use crate::domain::market::{Bar, BarQuery, Timeframe};
use crate::infrastructure::config::{Credentials, SourceSettings};
use crate::infrastructure::http;

/// Market name the plugin is registered under.
pub const MARKET: &str = "alpaca";

/// Data feeds accepted as providers.
pub const FEEDS: &[&str] = &["iex", "sip"];

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// Alpaca historical bars adapter.
#[derive(Debug, Clone)]
pub struct AlpacaPlugin {
    client: reqwest::Client,
    data_url: String,
    credentials: Credentials,
}

impl AlpacaPlugin {
    /// Create a plugin against `data_url` (e.g. `https://data.alpaca.markets`).
    ///
    /// # Errors
    ///
    /// Returns `PluginError::InitFailed` if the HTTP client cannot be built.
    pub fn new(data_url: impl Into<String>, credentials: Credentials) -> Result<Self, PluginError> {
        Ok(Self {
            client: http::build_client(MARKET)?,
            data_url: data_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

/// Factory that builds the plugin from `settings` on first use.
///
/// Missing or blank credentials surface as `PluginError::InitFailed`.
#[must_use]
pub fn alpaca_factory(settings: SourceSettings) -> PluginFactory {
    Arc::new(move || {
        let credentials = settings
            .alpaca_credentials()
            .map_err(|e| PluginError::InitFailed {
                name: MARKET.to_string(),
                reason: e.to_string(),
            })?;
        let plugin = AlpacaPlugin::new(settings.alpaca_data_url.clone(), credentials)?;
        Ok(Arc::new(plugin) as Arc<dyn MarketPlugin>)
    })
}

/// Alpaca timeframe parameter for a bar interval.
#[must_use]
pub const fn to_alpaca_timeframe(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::OneMinute => "1Min",
        Timeframe::FiveMinutes => "5Min",
        Timeframe::FifteenMinutes => "15Min",
        Timeframe::ThirtyMinutes => "30Min",
        Timeframe::OneHour => "1Hour",
        Timeframe::FourHours => "4Hour",
        Timeframe::OneDay => "1Day",
        Timeframe::OneWeek => "1Week",
    }
}

fn rfc3339(millis: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[async_trait]
impl MarketPlugin for AlpacaPlugin {
    fn name(&self) -> &str {
        MARKET
    }

    fn supports_timeframe(&self, _timeframe: Timeframe) -> bool {
        true
    }

    async fn fetch_bars(
        &self,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        query: &BarQuery,
    ) -> Result<Vec<Bar>, PluginError> {
        let feed = provider.to_ascii_lowercase();
        if !FEEDS.contains(&feed.as_str()) {
            return Err(PluginError::UnsupportedProvider {
                plugin: MARKET.to_string(),
                provider: provider.to_string(),
            });
        }

        let symbol = symbol.trim().to_uppercase();
        let mut params = vec![
            ("timeframe", to_alpaca_timeframe(timeframe).to_string()),
            ("limit", query.limit.to_string()),
            ("feed", feed),
            ("sort", "desc".to_string()),
        ];
        if let Some(start) = query.since.and_then(rfc3339) {
            params.push(("start", start));
        }
        if let Some(end) = query.before.and_then(rfc3339) {
            params.push(("end", end));
        }

        tracing::debug!(symbol = %symbol, timeframe = timeframe.as_str(), since = ?query.since, "Fetching Alpaca bars");

        let request = self
            .client
            .get(format!("{}/v2/stocks/{symbol}/bars", self.data_url))
            .header(KEY_HEADER, self.credentials.api_key())
            .header(SECRET_HEADER, self.credentials.api_secret())
            .query(&params);
        let response: BarsResponse = http::get_json(request).await?;

        Ok(query.normalize(response.into_bars()))
    }
}

// =============================================================================
// Tests
// =============================================================================
