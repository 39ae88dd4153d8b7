//! Client-facing WebSocket protocol.
//!
//! # Subscribe request
//!
//! `GET /ws?market=crypto&symbols=BTC/USD,ETH/USD&provider=kraken&timeframe=1m`
//!
//! # Control messages (client → server)
//!
//! ```json
//! {"action":"subscribe","symbols":["SOL/USD"],"timeframe":"5m"}
//! {"action":"unsubscribe","symbols":["SOL/USD"],"timeframe":"5m"}
//! ```
//!
//! # Replies (server → client)
//!
//! ```json
//! {"success":true,"subscribed":["crypto:kraken:BTC/USD:1m"]}
//! {"success":false,"error":"Market and symbols are required."}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::market::{SubscriptionKey, Timeframe};

/// Error text for a request without market or symbols.
pub const MISSING_PARAMS: &str = "Market and symbols are required.";

/// Error text for a subscribe that arrives while the server is stopping.
pub const SHUTTING_DOWN: &str = "Server is shutting down.";

/// Close code for a rejected subscribe request (policy violation).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Raw query parameters of the upgrade request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsParams {
    /// Market name.
    pub market: Option<String>,
    /// Comma-separated symbols.
    pub symbols: Option<String>,
    /// Provider within the market.
    pub provider: Option<String>,
    /// Bar interval; defaults to `1m`.
    pub timeframe: Option<String>,
}

/// Provider used when the client does not name one.
#[must_use]
pub fn default_provider(market: &str) -> String {
    match market {
        "crypto" => "kraken".to_string(),
        "alpaca" => "iex".to_string(),
        other => other.to_string(),
    }
}

/// Parse an optional timeframe, defaulting to one minute.
///
/// # Errors
///
/// Returns the client-facing error text for an unknown timeframe.
pub fn parse_timeframe(raw: Option<&str>) -> Result<Timeframe, String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Timeframe::OneMinute),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("Unsupported timeframe: {raw}")),
    }
}

fn split_symbols<'a>(symbols: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for symbol in symbols.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|seen| seen == symbol) {
            out.push(symbol.to_string());
        }
    }
    out
}

/// Market and provider a connection is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamScope {
    /// Market name, lowercase.
    pub market: String,
    /// Provider, lowercase.
    pub provider: String,
}

impl StreamScope {
    /// Keys for `symbols` at `timeframe` within this scope.
    ///
    /// # Errors
    ///
    /// Returns the client-facing error text if no usable symbol remains.
    pub fn keys<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a str>,
        timeframe: Timeframe,
    ) -> Result<Vec<SubscriptionKey>, String> {
        let symbols = split_symbols(symbols);
        if symbols.is_empty() {
            return Err(MISSING_PARAMS.to_string());
        }
        symbols
            .iter()
            .map(|symbol| {
                SubscriptionKey::new(&self.market, &self.provider, symbol, timeframe)
                    .map_err(|e| e.to_string())
            })
            .collect()
    }
}

/// A validated subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Market and provider of the connection.
    pub scope: StreamScope,
    /// Initial subscriptions.
    pub keys: Vec<SubscriptionKey>,
}

impl SubscribeRequest {
    /// Validate upgrade query parameters.
    ///
    /// # Errors
    ///
    /// Returns the client-facing error text when market or symbols are
    /// missing or the timeframe is unknown.
    pub fn from_params(params: &WsParams) -> Result<Self, String> {
        let market = params
            .market
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty());
        let symbols = params.symbols.as_deref().unwrap_or_default();

        let Some(market) = market else {
            return Err(MISSING_PARAMS.to_string());
        };
        if split_symbols(symbols.split(',')).is_empty() {
            return Err(MISSING_PARAMS.to_string());
        }

        let timeframe = parse_timeframe(params.timeframe.as_deref())?;
        let provider = params
            .provider
            .as_deref()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| default_provider(&market));

        let scope = StreamScope { market, provider };
        let keys = scope.keys(symbols.split(','), timeframe)?;
        Ok(Self { scope, keys })
    }
}

/// Control message sent on an open socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Add subscriptions.
    Subscribe {
        /// Symbols to add.
        symbols: Vec<String>,
        /// Bar interval; defaults to `1m`.
        #[serde(default)]
        timeframe: Option<String>,
    },
    /// Remove subscriptions.
    Unsubscribe {
        /// Symbols to remove.
        symbols: Vec<String>,
        /// Bar interval; defaults to `1m`.
        #[serde(default)]
        timeframe: Option<String>,
    },
}

/// Reply to a subscribe request or control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// Whether the request was accepted.
    pub success: bool,
    /// Keys now subscribed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<Vec<String>>,
    /// Keys removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unsubscribed: Option<Vec<String>>,
    /// Error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    /// Successful subscribe.
    #[must_use]
    pub fn subscribed(keys: &[SubscriptionKey]) -> Self {
        Self {
            success: true,
            subscribed: Some(keys.iter().map(ToString::to_string).collect()),
            unsubscribed: None,
            error: None,
        }
    }

    /// Successful unsubscribe.
    #[must_use]
    pub fn unsubscribed(keys: &[SubscriptionKey]) -> Self {
        Self {
            success: true,
            subscribed: None,
            unsubscribed: Some(keys.iter().map(ToString::to_string).collect()),
            error: None,
        }
    }

    /// Rejected request.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            subscribed: None,
            unsubscribed: None,
            error: Some(message.into()),
        }
    }

    /// JSON text of the reply.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"success":false,"error":"internal error"}"#.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
