//! Subscription Manager
//!
//! Top-level coordinator for live bar streams. It keeps the listener table,
//! owns one poll loop per active key, and tears the loop down when the last
//! listener leaves.
//!
//! # Poll loop
//!
//! Each loop runs as its own task:
//!
//! 1. Acquire the key lock (waits for a previous loop for the same key to exit).
//! 2. Fetch through the data source chain with `since` at the watermark.
//! 3. The first successful fetch seeds the watermark; later fetches broadcast
//!    every bar strictly newer than it, one envelope per bar.
//! 4. Sleep for the poll interval (stretched by backoff after failures).
//! 5. Release the key lock on exit.
//!
//! A bar is delivered once, when its timestamp first passes the watermark.
//! A venue bar that is still forming when first seen is not re-sent after it
//! closes; clients that need final values re-fetch history.
//!
//! A loop for key K exists exactly while K has at least one listener.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffConfig, PollBackoff};
use super::connections::ConnectionRegistry;
use super::data_chain::{ChainError, DataSourceChain};
use super::dispatcher::BroadcastDispatcher;
use super::key_lock::KeyLockManager;
use crate::application::ports::Connection;
use crate::domain::market::{BarQuery, SubscriptionKey, Timeframe, bars_after};
use crate::domain::subscription::{ConnectionId, ListenerTable};
use crate::infrastructure::metrics;

// =============================================================================
// Settings
// =============================================================================

/// Poll loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Shortest wait between polls.
    pub min_interval: Duration,
    /// Longest wait between polls while healthy.
    pub max_interval: Duration,
    /// Bars requested per fetch.
    pub history_limit: usize,
    /// Backoff applied after `DataUnavailable`.
    pub backoff: BackoffConfig,
    /// How long `shutdown` waits for loops to exit before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            history_limit: 500,
            backoff: BackoffConfig::default(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PollSettings {
    /// Poll interval for `timeframe`: a tenth of the bar duration, clamped.
    #[must_use]
    pub fn interval_for(&self, timeframe: Timeframe) -> Duration {
        let tenth = timeframe.duration() / 10;
        tenth.clamp(self.min_interval, self.max_interval.max(self.min_interval))
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of subscription state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Keys with a running poll loop.
    pub active_loops: usize,
    /// Connections with at least one subscription.
    pub connections: usize,
    /// Sum of listeners over every key.
    pub listeners: usize,
}

// =============================================================================
// Manager
// =============================================================================

struct PollLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    table: ListenerTable,
    handles: HashMap<ConnectionId, Arc<dyn Connection>>,
    loops: HashMap<SubscriptionKey, PollLoop>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    chain: Arc<DataSourceChain>,
    locks: Arc<KeyLockManager>,
    connections: Arc<ConnectionRegistry>,
    dispatcher: BroadcastDispatcher,
    settings: PollSettings,
}

/// Coordinates listeners and poll loops.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("stats", &self.stats())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Create a manager that polls through `chain`.
    #[must_use]
    pub fn new(
        chain: Arc<DataSourceChain>,
        locks: Arc<KeyLockManager>,
        connections: Arc<ConnectionRegistry>,
        settings: PollSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                chain,
                locks,
                connections,
                dispatcher: BroadcastDispatcher::new(),
                settings,
            }),
        }
    }

    /// Add `connection` as a listener of `key`.
    ///
    /// Returns `true` when this started a new poll loop. Subscribing a pair
    /// that is already subscribed changes nothing.
    pub fn subscribe(&self, connection: Arc<dyn Connection>, key: &SubscriptionKey) -> bool {
        let id = connection.id();
        let mut state = self.inner.state.lock();

        if state.closed {
            tracing::warn!(connection_id = id, key = %key, "Subscribe after shutdown ignored");
            return false;
        }

        state.handles.insert(id, connection);
        if !state.table.add(id, key) {
            tracing::debug!(connection_id = id, key = %key, "Listener added to running loop");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            key.clone(),
            cancel.clone(),
        ));
        state.loops.insert(key.clone(), PollLoop { cancel, handle });
        metrics::set_active_loops(state.loops.len());

        tracing::info!(connection_id = id, key = %key, "Poll loop started");
        true
    }

    /// Remove `connection` from the listeners of `key`.
    ///
    /// Returns `true` when this stopped the key's poll loop. Unknown pairs are
    /// a no-op.
    pub fn unsubscribe(&self, connection: ConnectionId, key: &SubscriptionKey) -> bool {
        self.inner.unsubscribe(connection, key)
    }

    /// Unsubscribe `connection` from every key. Returns the keys whose loops stopped.
    pub fn remove_connection(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        self.inner.remove_connection(connection)
    }

    /// Whether `key` has a running poll loop.
    #[must_use]
    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.inner.state.lock().loops.contains_key(key)
    }

    /// Number of connections listening on `key`.
    #[must_use]
    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.inner.state.lock().table.listener_count(key)
    }

    /// Keys with a running poll loop, sorted.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> =
            self.inner.state.lock().loops.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys `connection` listens on, sorted.
    #[must_use]
    pub fn keys_for(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let mut keys = self.inner.state.lock().table.keys_for(connection);
        keys.sort();
        keys
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.inner.state.lock();
        let listeners = state
            .table
            .active_keys()
            .iter()
            .map(|key| state.table.listener_count(key))
            .sum();
        SubscriptionStats {
            active_loops: state.loops.len(),
            connections: state.table.connection_count(),
            listeners,
        }
    }

    /// Whether `shutdown` has run. A closed manager ignores subscribes.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Poll interval used for `timeframe`.
    #[must_use]
    pub fn interval_for(&self, timeframe: Timeframe) -> Duration {
        self.inner.settings.interval_for(timeframe)
    }

    /// Stop every loop and forget every listener.
    ///
    /// Waits up to the configured timeout for loops to exit, then aborts the
    /// stragglers. Later subscribes are ignored. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let loops: Vec<(SubscriptionKey, PollLoop)> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.table.clear();
            state.handles.clear();
            state.loops.drain().collect()
        };
        metrics::set_active_loops(0);

        if loops.is_empty() {
            return;
        }

        let count = loops.len();
        let mut aborts = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for (_, poll_loop) in loops {
            poll_loop.cancel.cancel();
            aborts.push(poll_loop.handle.abort_handle());
            handles.push(poll_loop.handle);
        }

        if tokio::time::timeout(self.inner.settings.shutdown_timeout, join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!(loops = count, "Poll loops did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        tracing::info!(loops = count, "Subscription manager stopped");
    }
}

impl Inner {
    fn unsubscribe(&self, connection: ConnectionId, key: &SubscriptionKey) -> bool {
        let mut state = self.state.lock();

        let deactivated = state.table.remove(connection, key);
        if state.table.keys_for(connection).is_empty() {
            state.handles.remove(&connection);
        }
        if deactivated {
            stop_loop(&mut state, key);
        }
        deactivated
    }

    fn remove_connection(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let mut state = self.state.lock();
        state.handles.remove(&connection);
        let deactivated = state.table.remove_connection(connection);
        for key in &deactivated {
            stop_loop(&mut state, key);
        }
        deactivated
    }

    fn listeners(&self, key: &SubscriptionKey) -> Vec<Arc<dyn Connection>> {
        let state = self.state.lock();
        state
            .table
            .listeners(key)
            .iter()
            .filter_map(|id| state.handles.get(id).cloned())
            .collect()
    }

    fn drop_dead(&self, dead: &[ConnectionId]) {
        for &id in dead {
            let stopped = self.remove_connection(id);
            self.connections.unregister(id);
            tracing::info!(connection_id = id, stopped_loops = stopped.len(), "Dropped dead connection");
        }
    }

    /// One fetch/diff/broadcast cycle. Returns the number of bars broadcast.
    async fn poll_once(
        &self,
        key: &SubscriptionKey,
        watermark: &mut Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<usize, ChainError> {
        let query = BarQuery::since(*watermark, self.settings.history_limit);
        let bars = self.chain.fetch(key, &query).await?;

        let Some(mark) = *watermark else {
            *watermark = bars.last().map(|bar| bar.timestamp);
            tracing::debug!(key = %key, watermark = ?*watermark, "Watermark seeded");
            return Ok(0);
        };

        let fresh = bars_after(&bars, Some(mark));
        let Some(newest) = fresh.last() else {
            return Ok(0);
        };
        *watermark = Some(newest.timestamp);

        if cancel.is_cancelled() {
            return Ok(0);
        }

        let mut sent = 0;
        for bar in &fresh {
            let subscribers = self.listeners(key);
            if subscribers.is_empty() {
                break;
            }

            match self.dispatcher.broadcast(key, bar, &subscribers).await {
                Ok(failed) => {
                    if !failed.is_empty() {
                        self.drop_dead(&failed);
                    }
                    sent += 1;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Failed to encode update");
                    break;
                }
            }
        }

        tracing::debug!(key = %key, bars = sent, watermark = newest.timestamp, "Broadcast new bars");
        Ok(sent)
    }
}

fn stop_loop(state: &mut State, key: &SubscriptionKey) {
    if let Some(poll_loop) = state.loops.remove(key) {
        poll_loop.cancel.cancel();
        tracing::info!(key = %key, "Poll loop stopping");
    }
    metrics::set_active_loops(state.loops.len());
}

async fn run_loop(inner: Arc<Inner>, key: SubscriptionKey, cancel: CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => return,
        () = inner.locks.acquire(&key) => {}
    }

    let interval = inner.settings.interval_for(key.timeframe());
    let mut backoff = PollBackoff::new(interval, inner.settings.backoff);
    let mut watermark: Option<i64> = None;

    tracing::debug!(key = %key, interval_ms = interval.as_millis(), "Poll loop running");

    while !cancel.is_cancelled() {
        let cycle = AssertUnwindSafe(inner.poll_once(&key, &mut watermark, &cancel))
            .catch_unwind()
            .await;

        match cycle {
            Ok(Ok(_)) => {
                metrics::record_poll(key.market(), metrics::PollOutcome::Ok);
                backoff.reset();
            }
            Ok(Err(ChainError::DataUnavailable { reason, .. })) => {
                metrics::record_poll(key.market(), metrics::PollOutcome::Unavailable);
                backoff.record_failure();
                tracing::warn!(key = %key, failures = backoff.failures(), reason = %reason, "No data available");
            }
            Ok(Err(e)) => {
                metrics::record_poll(key.market(), metrics::PollOutcome::Error);
                backoff.record_failure();
                tracing::error!(key = %key, error = %e, "Poll failed");
            }
            Err(_) => {
                metrics::record_poll(key.market(), metrics::PollOutcome::Panic);
                backoff.record_failure();
                tracing::error!(key = %key, "Poll cycle panicked");
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(backoff.next_delay()) => {}
        }
    }

    inner.locks.release(&key);
    tracing::info!(key = %key, "Poll loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
