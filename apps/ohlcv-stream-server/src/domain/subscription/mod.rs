//! Listener Tracking
//!
//! Domain bookkeeping for which connections listen to which bar streams.
//!
//! # Design
//!
//! The listener table tracks:
//! - Which subscription keys each connection listens to
//! - Which connections listen to each key
//!
//! A key is *active* while at least one connection listens to it. The table
//! reports the 0→1 and 1→0 transitions so the caller can start and stop the
//! single poll loop behind each key. The table itself is not synchronized;
//! the subscription service owns it behind one mutex.

use std::collections::{HashMap, HashSet};

use super::market::SubscriptionKey;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a client connection.
pub type ConnectionId = u64;

// =============================================================================
// Listener Table
// =============================================================================

/// Bidirectional map between connections and subscription keys.
#[derive(Debug, Default)]
pub struct ListenerTable {
    /// Map from connection to the keys it listens to.
    connection_keys: HashMap<ConnectionId, HashSet<SubscriptionKey>>,
    /// Map from key to its listeners.
    key_listeners: HashMap<SubscriptionKey, HashSet<ConnectionId>>,
}

impl ListenerTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` as a listener of `key`.
    ///
    /// Returns `true` if the key went from no listeners to one.
    pub fn add(&mut self, connection: ConnectionId, key: &SubscriptionKey) -> bool {
        let keys = self.connection_keys.entry(connection).or_default();

        // Skip if connection already listens
        if !keys.insert(key.clone()) {
            return false;
        }

        let listeners = self.key_listeners.entry(key.clone()).or_default();
        listeners.insert(connection);

        listeners.len() == 1
    }

    /// Remove `connection` from the listeners of `key`.
    ///
    /// Returns `true` if the key lost its last listener. Unknown pairs are ignored.
    pub fn remove(&mut self, connection: ConnectionId, key: &SubscriptionKey) -> bool {
        let Some(keys) = self.connection_keys.get_mut(&connection) else {
            return false;
        };

        if !keys.remove(key) {
            return false;
        }

        if keys.is_empty() {
            self.connection_keys.remove(&connection);
        }

        self.detach(connection, key)
    }

    /// Remove every subscription held by `connection`.
    ///
    /// Returns the keys that lost their last listener.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let Some(keys) = self.connection_keys.remove(&connection) else {
            return vec![];
        };

        let mut deactivated: Vec<SubscriptionKey> = keys
            .into_iter()
            .filter(|key| self.detach(connection, key))
            .collect();
        deactivated.sort();
        deactivated
    }

    /// Drop every listener of every key.
    ///
    /// Returns the keys that were active.
    pub fn clear(&mut self) -> Vec<SubscriptionKey> {
        self.connection_keys.clear();
        let mut keys: Vec<_> = self.key_listeners.drain().map(|(key, _)| key).collect();
        keys.sort();
        keys
    }

    /// Listeners of `key`.
    #[must_use]
    pub fn listeners(&self, key: &SubscriptionKey) -> Vec<ConnectionId> {
        self.key_listeners
            .get(key)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Keys `connection` listens to.
    #[must_use]
    pub fn keys_for(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        self.connection_keys
            .get(&connection)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `key` has any listener.
    #[must_use]
    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.key_listeners.contains_key(key)
    }

    /// Number of listeners on `key`.
    #[must_use]
    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.key_listeners.get(key).map_or(0, HashSet::len)
    }

    /// All keys with at least one listener.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.key_listeners.keys().cloned().collect()
    }

    /// Number of active keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.key_listeners.len()
    }

    /// Number of connections with at least one subscription.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connection_keys.len()
    }

    fn detach(&mut self, connection: ConnectionId, key: &SubscriptionKey) -> bool {
        let Some(listeners) = self.key_listeners.get_mut(key) else {
            return false;
        };

        listeners.remove(&connection);

        // Last listener removed - key goes inactive
        if listeners.is_empty() {
            self.key_listeners.remove(key);
            return true;
        }

        false
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;

    fn key(symbol: &str) -> SubscriptionKey {
        SubscriptionKey::new("crypto", "kraken", symbol, Timeframe::OneMinute).unwrap()
    }

    #[test]
    fn first_listener_activates_key() {
        let mut table = ListenerTable::new();

        assert!(table.add(1, &key("BTC/USD")));
        assert!(table.is_active(&key("BTC/USD")));
    }

    #[test]
    fn second_listener_does_not_reactivate() {
        let mut table = ListenerTable::new();

        table.add(1, &key("BTC/USD"));
        assert!(!table.add(2, &key("BTC/USD")));
        assert_eq!(table.listener_count(&key("BTC/USD")), 2);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let mut table = ListenerTable::new();

        table.add(1, &key("BTC/USD"));
        assert!(!table.add(1, &key("BTC/USD")));
        assert_eq!(table.listener_count(&key("BTC/USD")), 1);
    }

    #[test]
    fn remove_with_remaining_listeners_keeps_key() {
        let mut table = ListenerTable::new();

        table.add(1, &key("BTC/USD"));
        table.add(2, &key("BTC/USD"));

        assert!(!table.remove(1, &key("BTC/USD")));
        assert!(table.is_active(&key("BTC/USD")));
    }

    #[test]
    fn remove_last_listener_deactivates() {
        let mut table = ListenerTable::new();

        table.add(1, &key("BTC/USD"));

        assert!(table.remove(1, &key("BTC/USD")));
        assert!(!table.is_active(&key("BTC/USD")));
        assert_eq!(table.connection_count(), 0);
    }

    #[test]
    fn remove_unknown_pair_is_noop() {
        let mut table = ListenerTable::new();
        table.add(1, &key("BTC/USD"));

        assert!(!table.remove(2, &key("BTC/USD")));
        assert!(!table.remove(1, &key("ETH/USD")));
        assert_eq!(table.listener_count(&key("BTC/USD")), 1);
    }

    #[test]
    fn remove_connection_reports_emptied_keys() {
        let mut table = ListenerTable::new();

        table.add(1, &key("BTC/USD"));
        table.add(1, &key("ETH/USD"));
        table.add(2, &key("ETH/USD"));

        let deactivated = table.remove_connection(1);

        assert_eq!(deactivated, vec![key("BTC/USD")]);
        assert!(table.is_active(&key("ETH/USD")));
        assert!(table.keys_for(1).is_empty());
    }

    #[test]
    fn remove_unknown_connection_no_changes() {
        let mut table = ListenerTable::new();
        table.add(1, &key("BTC/USD"));

        assert!(table.remove_connection(99).is_empty());
        assert_eq!(table.key_count(), 1);
    }

    #[test]
    fn clear_returns_all_active_keys() {
        let mut table = ListenerTable::new();
        table.add(1, &key("BTC/USD"));
        table.add(2, &key("ETH/USD"));

        let cleared = table.clear();

        assert_eq!(cleared, vec![key("BTC/USD"), key("ETH/USD")]);
        assert_eq!(table.key_count(), 0);
        assert_eq!(table.connection_count(), 0);
    }

    #[test]
    fn keys_for_connection() {
        let mut table = ListenerTable::new();
        table.add(7, &key("BTC/USD"));
        table.add(7, &key("ETH/USD"));

        let mut keys = table.keys_for(7);
        keys.sort();
        assert_eq!(keys, vec![key("BTC/USD"), key("ETH/USD")]);
    }
}
