//! Configuration Module
//!
//! Configuration loading and dependency injection for the stream server.

mod settings;
mod state;

pub use settings::{
    CacheSettings, ConfigError, Credentials, DEFAULT_ALPACA_DATA_URL, DEFAULT_KRAKEN_BASE_URL,
    DeliverySettings, HeartbeatSettings, PollConfig, ServerConfig, ServerSettings, SourceSettings,
};
pub use state::AppState;
