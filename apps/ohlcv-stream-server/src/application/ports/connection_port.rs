//! Connection Port (Driven Port)
//!
//! Outbound side of one client connection. The WebSocket server provides
//! the production implementation; tests substitute recording doubles.

use async_trait::async_trait;

use crate::domain::subscription::ConnectionId;

/// WebSocket close code sent at process shutdown (going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Delivery failure for a single connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The connection is gone.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The outbound queue stayed full past the send timeout.
    #[error("send to connection {0} timed out")]
    Timeout(ConnectionId),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// An open bidirectional channel to one client.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Process-unique identity.
    fn id(&self) -> ConnectionId;

    /// Queue a text message for the client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the client can no longer receive messages.
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError>;

    /// Close the connection with a WebSocket status code.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the close frame could not be queued.
    async fn close(&self, code: u16, reason: &str) -> Result<(), DeliveryError>;
}
