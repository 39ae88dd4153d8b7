//! Kraken Market Plugin
//!
//! Live source for the `crypto` market backed by Kraken's public OHLC
//! endpoint (`GET /0/public/OHLC`). No credentials are needed, so the plugin
//! is registered eagerly.

pub mod messages;

use std::collections::HashMap;

use async_trait::async_trait;

use self::messages::{KrakenResponse, bars_from_result};
use crate::application::ports::{MarketPlugin, PluginError};
use crate::domain::market::{Bar, BarQuery, Timeframe};
use crate::infrastructure::http;

/// Market name the plugin is registered under.
pub const MARKET: &str = "crypto";

/// The only provider this plugin serves.
pub const PROVIDER: &str = "kraken";

const OHLC_PATH: &str = "/0/public/OHLC";

/// Kraken public OHLC adapter.
#[derive(Debug, Clone)]
pub struct KrakenPlugin {
    client: reqwest::Client,
    base_url: String,
}

impl KrakenPlugin {
    /// Create a plugin against `base_url` (e.g. `https://api.kraken.com`).
    ///
    /// # Errors
    ///
    /// Returns `PluginError::InitFailed` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, PluginError> {
        Ok(Self {
            client: http::build_client(MARKET)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Kraken pair name for a client symbol: `BTC/USD` becomes `XBTUSD`.
#[must_use]
pub fn to_kraken_pair(symbol: &str) -> String {
    symbol.to_uppercase().replace('/', "").replace("BTC", "XBT")
}

#[async_trait]
impl MarketPlugin for KrakenPlugin {
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
        if !provider.eq_ignore_ascii_case(PROVIDER) {
            return Err(PluginError::UnsupportedProvider {
                plugin: MARKET.to_string(),
                provider: provider.to_string(),
            });
        }

        let pair = to_kraken_pair(symbol);
        let mut params = vec![
            ("pair", pair.clone()),
            ("interval", timeframe.minutes().to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("since", since.div_euclid(1_000).to_string()));
        }

        tracing::debug!(pair = %pair, interval = timeframe.as_str(), since = ?query.since, "Fetching Kraken OHLC");

        let request = self
            .client
            .get(format!("{}{OHLC_PATH}", self.base_url))
            .query(&params);
        let response: KrakenResponse<HashMap<String, serde_json::Value>> =
            http::get_json(request).await?;

        bars_from_result(response.into_result()?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test_case("BTC/USD", "XBTUSD" ; "bitcoin mapped to xbt")]
    #[test_case("eth/usd", "ETHUSD" ; "lowercase uppercased")]
    #[test_case("SOLUSD", "SOLUSD" ; "already a pair")]
    fn pair_mapping(symbol: &str, expected: &str) {
        assert_eq!(to_kraken_pair(symbol), expected);
    }

    #[tokio::test]
    async fn fetches_and_converts_bars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/0/public/OHLC"))
            .and(query_param("pair", "XBTUSD"))
            .and(query_param("interval", "5"))
            .and(query_param("since", "1688671"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error":[],"result":{"XXBTZUSD":[[1688671200,"1","2","0.5","1.5","1.2","10",3]],"last":1688671200}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let plugin = KrakenPlugin::new(server.uri()).unwrap();
        let bars = plugin
            .fetch_bars("kraken", "BTC/USD", Timeframe::FiveMinutes, &BarQuery::since(Some(1_688_671_000), 10))
            .await
            .unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, 1_688_671_200_000);
        assert!((bars[0].high - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn other_provider_is_rejected() {
        let plugin = KrakenPlugin::new("http://127.0.0.1:9").unwrap();

        let err = plugin
            .fetch_bars("binance", "BTC/USD", Timeframe::OneMinute, &BarQuery::latest(10))
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::UnsupportedProvider { provider, .. } if provider == "binance"));
    }

    #[tokio::test]
    async fn http_error_is_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let plugin = KrakenPlugin::new(server.uri()).unwrap();
        let err = plugin
            .fetch_bars("kraken", "BTC/USD", Timeframe::OneMinute, &BarQuery::latest(10))
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::Request { message } if message.contains("503")));
    }

    #[tokio::test]
    async fn kraken_error_envelope_is_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"error":["EQuery:Unknown asset pair"]}"#),
            )
            .mount(&server)
            .await;

        let plugin = KrakenPlugin::new(server.uri()).unwrap();
        let err = plugin
            .fetch_bars("kraken", "FOO/BAR", Timeframe::OneMinute, &BarQuery::latest(10))
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::Request { .. }));
    }
}
