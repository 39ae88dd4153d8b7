//! Broadcast Dispatcher
//!
//! Fans one payload out to every connection listening on a key. Delivery to
//! each connection is independent: one slow or dead client never delays or
//! fails the others, it is only reported back to the caller.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use crate::application::ports::{Connection, DeliveryError};
use crate::domain::market::SubscriptionKey;
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::metrics;

/// Message pushed to clients for each new bar.
#[derive(Debug, Serialize)]
pub struct UpdateEnvelope<'a, P: Serialize> {
    /// Always `"update"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Instrument symbol.
    pub symbol: &'a str,
    /// Timeframe string form.
    pub timeframe: &'static str,
    /// The bar (or other payload).
    pub payload: &'a P,
}

impl<'a, P: Serialize> UpdateEnvelope<'a, P> {
    /// Build the envelope for `key`.
    #[must_use]
    pub fn new(key: &'a SubscriptionKey, payload: &'a P) -> Self {
        Self {
            kind: "update",
            symbol: key.symbol(),
            timeframe: key.timeframe().as_str(),
            payload,
        }
    }
}

/// Concurrent fan-out to subscriber connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct BroadcastDispatcher;

impl BroadcastDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Send `payload` for `key` to every subscriber.
    ///
    /// Returns the ids of the connections that failed to receive it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Encode` if the envelope cannot be serialized;
    /// nothing is sent in that case.
    pub async fn broadcast<P: Serialize + Sync>(
        &self,
        key: &SubscriptionKey,
        payload: &P,
        subscribers: &[Arc<dyn Connection>],
    ) -> Result<Vec<ConnectionId>, DeliveryError> {
        let text = serde_json::to_string(&UpdateEnvelope::new(key, payload))
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;

        let deliveries = subscribers.iter().map(|connection| {
            let text = text.as_str();
            async move {
                match connection.send_text(text).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::debug!(connection_id = connection.id(), key = %key, error = %e, "Delivery failed");
                        Some(connection.id())
                    }
                }
            }
        });

        let failed: Vec<ConnectionId> = join_all(deliveries).await.into_iter().flatten().collect();

        let sent = subscribers.len() - failed.len();
        metrics::record_deliveries(sent, failed.len());
        if !failed.is_empty() {
            tracing::warn!(key = %key, failed = failed.len(), sent, "Broadcast had failed deliveries");
        }

        Ok(failed)
    }
}

// =============================================================================
// Tests
// =============================================================================
