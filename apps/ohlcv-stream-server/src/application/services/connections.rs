//! Connection Registry
//!
//! Process-wide set of live client connections, used for bulk teardown at
//! shutdown and for connection counts in health reporting.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::ports::Connection;
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::metrics;

/// Registry of every live connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    live: Mutex<HashMap<ConnectionId, Arc<dyn Connection>>>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("live", &self.live.lock().len())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Re-registering the same id replaces the handle.
    pub fn register(&self, connection: Arc<dyn Connection>) {
        let count = {
            let mut live = self.live.lock();
            live.insert(connection.id(), connection);
            live.len()
        };
        metrics::set_connections(count);
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut live = self.live.lock();
            let removed = live.remove(&id).is_some();
            (removed, live.len())
        };
        metrics::set_connections(count);
        removed
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.live.lock().contains_key(&id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    /// Snapshot and clear the registry, then close every connection with `code`.
    ///
    /// Individual close failures are logged. Returns the number of
    /// connections that were registered.
    pub async fn close_all(&self, code: u16) -> usize {
        let snapshot: Vec<Arc<dyn Connection>> = {
            let mut live = self.live.lock();
            live.drain().map(|(_, connection)| connection).collect()
        };
        metrics::set_connections(0);

        let total = snapshot.len();
        for connection in snapshot {
            if let Err(e) = connection.close(code, "server shutting down").await {
                tracing::warn!(connection_id = connection.id(), error = %e, "Failed to close connection");
            }
        }

        tracing::info!(closed = total, code, "Closed all connections");
        total
    }
}

// =============================================================================
// Tests
// =============================================================================
