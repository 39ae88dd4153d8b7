//! Domain Layer - Core bar streaming types.
//!
//! This layer contains the value types for bar streams and the listener
//! bookkeeping behind subscriptions. Nothing here performs I/O.

/// Market data types (subscription keys, timeframes, bars).
pub mod market;

/// Listener tracking per subscription key.
pub mod subscription;
