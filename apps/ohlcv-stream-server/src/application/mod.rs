//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (bar sources, plugins, connections).
pub mod ports;

/// Application services for subscriptions, retrieval and fan-out.
pub mod services;

#[cfg(test)]
pub(crate) mod testing;
