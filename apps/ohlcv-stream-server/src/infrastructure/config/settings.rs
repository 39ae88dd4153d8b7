//! Server Configuration Settings
//!
//! Configuration types for the stream server, loaded from environment variables.

use std::time::Duration;

use crate::application::services::{BackoffConfig, DEFAULT_MAX_LIMIT, PollSettings};

/// Default Kraken REST base URL.
pub const DEFAULT_KRAKEN_BASE_URL: &str = "https://api.kraken.com";

/// Default Alpaca market data base URL.
pub const DEFAULT_ALPACA_DATA_URL: &str = "https://data.alpaca.markets";

/// Alpaca API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket server port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            health_port: 8082,
        }
    }
}

/// Poll loop settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Shortest poll interval.
    pub min_interval: Duration,
    /// Longest healthy poll interval.
    pub max_interval: Duration,
    /// Bars requested per poll.
    pub history_limit: usize,
    /// Ceiling for the backed-off interval.
    pub backoff_max: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1_000),
            max_interval: Duration::from_millis(30_000),
            history_limit: 500,
            backoff_max: Duration::from_millis(60_000),
        }
    }
}

/// In-memory bar cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// How long cached bars answer fetches.
    pub ttl: Duration,
    /// Bars retained per key.
    pub max_bars_per_key: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(500),
            max_bars_per_key: 2_000,
        }
    }
}

/// Per-connection delivery settings.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// How long a send may wait on a full outbound queue.
    pub send_timeout: Duration,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(2_000),
            queue_capacity: 256,
        }
    }
}

/// Client heartbeat settings.
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    /// Server ping interval.
    pub interval: Duration,
    /// Silence after which a client is considered gone.
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Upstream market data settings.
#[derive(Clone)]
pub struct SourceSettings {
    /// Kraken REST base URL.
    pub kraken_base_url: String,
    /// Alpaca market data base URL.
    pub alpaca_data_url: String,
    alpaca_key: Option<String>,
    alpaca_secret: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kraken_base_url: DEFAULT_KRAKEN_BASE_URL.to_string(),
            alpaca_data_url: DEFAULT_ALPACA_DATA_URL.to_string(),
            alpaca_key: None,
            alpaca_secret: None,
        }
    }
}

impl std::fmt::Debug for SourceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSettings")
            .field("kraken_base_url", &self.kraken_base_url)
            .field("alpaca_data_url", &self.alpaca_data_url)
            .field("alpaca_key", &self.alpaca_key.as_ref().map(|_| "[REDACTED]"))
            .field("alpaca_secret", &self.alpaca_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SourceSettings {
    /// Attach Alpaca credentials as raw values.
    #[must_use]
    pub fn with_alpaca_credentials(mut self, key: Option<String>, secret: Option<String>) -> Self {
        self.alpaca_key = key;
        self.alpaca_secret = secret;
        self
    }

    /// Alpaca credentials, validated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if a value is absent and
    /// `ConfigError::EmptyValue` if it is blank.
    pub fn alpaca_credentials(&self) -> Result<Credentials, ConfigError> {
        let key = require("ALPACA_KEY", self.alpaca_key.as_deref())?;
        let secret = require("ALPACA_SECRET", self.alpaca_secret.as_deref())?;
        Ok(Credentials::new(key, secret))
    }
}

fn require(name: &str, value: Option<&str>) -> Result<String, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(name.to_string()));
    }
    Ok(value.to_string())
}

/// Complete server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Poll loop settings.
    pub poll: PollConfig,
    /// Memory cache settings.
    pub cache: CacheSettings,
    /// Delivery settings.
    pub delivery: DeliverySettings,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSettings,
    /// Upstream source settings.
    pub sources: SourceSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value or the
    /// poll interval bounds are inverted.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader { lookup: &lookup };
        let defaults = Self::default();

        let server = ServerSettings {
            ws_port: env.parse("STREAM_SERVER_WS_PORT", defaults.server.ws_port)?,
            health_port: env.parse("STREAM_SERVER_HEALTH_PORT", defaults.server.health_port)?,
        };

        let poll = PollConfig {
            min_interval: env.millis("POLL_MIN_INTERVAL_MS", defaults.poll.min_interval)?,
            max_interval: env.millis("POLL_MAX_INTERVAL_MS", defaults.poll.max_interval)?,
            history_limit: env.parse("POLL_HISTORY_LIMIT", defaults.poll.history_limit)?,
            backoff_max: env.millis("POLL_BACKOFF_MAX_MS", defaults.poll.backoff_max)?,
        };
        if poll.min_interval > poll.max_interval {
            return Err(ConfigError::Invalid {
                key: "POLL_MIN_INTERVAL_MS".to_string(),
                reason: "must not exceed POLL_MAX_INTERVAL_MS".to_string(),
            });
        }
        if poll.history_limit == 0 || poll.history_limit > DEFAULT_MAX_LIMIT {
            return Err(ConfigError::Invalid {
                key: "POLL_HISTORY_LIMIT".to_string(),
                reason: format!("must be between 1 and {DEFAULT_MAX_LIMIT}"),
            });
        }

        let cache = CacheSettings {
            ttl: env.millis("CACHE_TTL_MS", defaults.cache.ttl)?,
            max_bars_per_key: env.parse("CACHE_MAX_BARS_PER_KEY", defaults.cache.max_bars_per_key)?,
        };

        let delivery = DeliverySettings {
            send_timeout: env.millis("DELIVERY_SEND_TIMEOUT_MS", defaults.delivery.send_timeout)?,
            queue_capacity: env.parse("DELIVERY_QUEUE_CAPACITY", defaults.delivery.queue_capacity)?,
        };
        if delivery.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "DELIVERY_QUEUE_CAPACITY".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let heartbeat = HeartbeatSettings {
            interval: env.secs("HEARTBEAT_INTERVAL_SECS", defaults.heartbeat.interval)?,
            timeout: env.secs("HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat.timeout)?,
        };
        if heartbeat.interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "HEARTBEAT_INTERVAL_SECS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let sources = SourceSettings {
            kraken_base_url: env
                .string("KRAKEN_BASE_URL")
                .unwrap_or(defaults.sources.kraken_base_url),
            alpaca_data_url: env
                .string("ALPACA_DATA_URL")
                .unwrap_or(defaults.sources.alpaca_data_url),
            ..SourceSettings::default()
        }
        .with_alpaca_credentials(lookup("ALPACA_KEY"), lookup("ALPACA_SECRET"));

        Ok(Self {
            server,
            poll,
            cache,
            delivery,
            heartbeat,
            sources,
        })
    }

    /// Poll settings for the subscription manager.
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            min_interval: self.poll.min_interval,
            max_interval: self.poll.max_interval,
            history_limit: self.poll.history_limit,
            backoff: BackoffConfig {
                max_delay: self.poll.backoff_max,
                ..BackoffConfig::default()
            },
            ..PollSettings::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("cannot parse {raw:?}"),
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(_) => self.parse::<u64>(key, 0).map(Duration::from_millis),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(_) => self.parse::<u64>(key, 0).map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.server.ws_port, 8080);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.poll.min_interval, Duration::from_secs(1));
        assert_eq!(config.poll.max_interval, Duration::from_secs(30));
        assert_eq!(config.poll.history_limit, 500);
        assert_eq!(config.poll.backoff_max, Duration::from_secs(60));
        assert_eq!(config.cache.ttl, Duration::from_millis(500));
        assert_eq!(config.cache.max_bars_per_key, 2_000);
        assert_eq!(config.delivery.send_timeout, Duration::from_secs(2));
        assert_eq!(config.delivery.queue_capacity, 256);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(90));
        assert_eq!(config.sources.kraken_base_url, DEFAULT_KRAKEN_BASE_URL);
        assert_eq!(config.sources.alpaca_data_url, DEFAULT_ALPACA_DATA_URL);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("STREAM_SERVER_WS_PORT", "9000"),
            ("POLL_MIN_INTERVAL_MS", "250"),
            ("CACHE_MAX_BARS_PER_KEY", "50"),
            ("HEARTBEAT_TIMEOUT_SECS", "10"),
            ("KRAKEN_BASE_URL", "http://localhost:1234"),
        ])
        .unwrap();

        assert_eq!(config.server.ws_port, 9000);
        assert_eq!(config.poll.min_interval, Duration::from_millis(250));
        assert_eq!(config.cache.max_bars_per_key, 50);
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(10));
        assert_eq!(config.sources.kraken_base_url, "http://localhost:1234");
    }

    #[test]
    fn unparseable_value_is_invalid() {
        let err = config_from(&[("STREAM_SERVER_WS_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "STREAM_SERVER_WS_PORT"));
    }

    #[test]
    fn inverted_poll_bounds_are_invalid() {
        let err = config_from(&[
            ("POLL_MIN_INTERVAL_MS", "5000"),
            ("POLL_MAX_INTERVAL_MS", "1000"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn history_limit_bounds() {
        let max = DEFAULT_MAX_LIMIT.to_string();
        let config = config_from(&[("POLL_HISTORY_LIMIT", max.as_str())]).unwrap();
        assert_eq!(config.poll.history_limit, DEFAULT_MAX_LIMIT);

        let over = (DEFAULT_MAX_LIMIT + 1).to_string();
        let err = config_from(&[("POLL_HISTORY_LIMIT", over.as_str())]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "POLL_HISTORY_LIMIT"));

        let err = config_from(&[("POLL_HISTORY_LIMIT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "POLL_HISTORY_LIMIT"));
    }

    #[test]
    fn blank_value_uses_default() {
        let config = config_from(&[("POLL_HISTORY_LIMIT", "  ")]).unwrap();
        assert_eq!(config.poll.history_limit, 500);
    }

    #[test]
    fn alpaca_credentials_missing() {
        let config = config_from(&[]).unwrap();
        let err = config.sources.alpaca_credentials().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "ALPACA_KEY"));
    }

    #[test]
    fn alpaca_credentials_empty() {
        let config = config_from(&[("ALPACA_KEY", "key"), ("ALPACA_SECRET", "")]).unwrap();
        let err = config.sources.alpaca_credentials().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(name) if name == "ALPACA_SECRET"));
    }

    #[test]
    fn alpaca_credentials_present() {
        let config = config_from(&[("ALPACA_KEY", "key123"), ("ALPACA_SECRET", "secret456")]).unwrap();
        let creds = config.sources.alpaca_credentials().unwrap();
        assert_eq!(creds.api_key(), "key123");
        assert_eq!(creds.api_secret(), "secret456");
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));

        let sources = SourceSettings::default()
            .with_alpaca_credentials(Some("key123".to_string()), Some("secret456".to_string()));
        let debug = format!("{sources:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
    }

    #[test]
    fn poll_settings_carry_bounds() {
        let config = config_from(&[("POLL_BACKOFF_MAX_MS", "9000")]).unwrap();
        let settings = config.poll_settings();

        assert_eq!(settings.min_interval, Duration::from_secs(1));
        assert_eq!(settings.max_interval, Duration::from_secs(30));
        assert_eq!(settings.history_limit, 500);
        assert_eq!(settings.backoff.max_delay, Duration::from_secs(9));
    }
}
