//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionManager`: Listener bookkeeping and one poll loop per key
//! - `DataSourceChain`: Tiered bar retrieval with fallback and write-back
//! - `BroadcastDispatcher`: Concurrent fan-out of update envelopes
//! - `KeyLockManager`: Single-writer lock per subscription key
//! - `ConnectionRegistry`: Process-wide set of live connections
//! - `PluginRegistry`: Market name to live-source adapter

mod backoff;
mod connections;
mod data_chain;
mod dispatcher;
mod key_lock;
mod plugins;
mod subscription_manager;

pub use backoff::{BackoffConfig, PollBackoff};
pub use connections::ConnectionRegistry;
pub use data_chain::{ChainError, DEFAULT_MAX_LIMIT, DataSourceChain};
pub use dispatcher::{BroadcastDispatcher, UpdateEnvelope};
pub use key_lock::KeyLockManager;
pub use plugins::{PluginFactory, PluginRegistry};
pub use subscription_manager::{PollSettings, SubscriptionManager, SubscriptionStats};
