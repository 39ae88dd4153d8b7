//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BarSource`: One retrieval tier of the data source chain
//! - `MarketPlugin`: Live upstream adapter for one market
//! - `Connection`: Outbound side of a client connection

mod bar_source_port;
mod connection_port;
mod market_plugin_port;

pub use bar_source_port::{BarSource, SourceError};
pub use connection_port::{CLOSE_GOING_AWAY, Connection, DeliveryError};
pub use market_plugin_port::{MarketPlugin, PluginError};
