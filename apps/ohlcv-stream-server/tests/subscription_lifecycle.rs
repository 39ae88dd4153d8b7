//! Subscription Lifecycle Integration Tests
//!
//! Exercises the subscription manager, chain and registries together through
//! the public API, with in-process tiers and connections.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ohlcv_stream_server::infrastructure::cache::MemoryBarCache;
use ohlcv_stream_server::infrastructure::config::CacheSettings;
use ohlcv_stream_server::{
    Bar, BarQuery, BarSource, Connection, ConnectionId, ConnectionRegistry, DataSourceChain,
    DeliveryError, KeyLockManager, PollSettings, SourceError, SubscriptionKey, SubscriptionManager,
    Timeframe,
};

fn bar(timestamp: i64) -> Bar {
    Bar {
        timestamp,
        open: 1.0,
        high: 1.0,
        low: 1.0,
        close: 1.0,
        volume: 1.0,
    }
}

fn key(symbol: &str) -> SubscriptionKey {
    SubscriptionKey::new("crypto", "kraken", symbol, Timeframe::OneMinute).unwrap()
}

/// Live tier that appends one bar per fetch and tracks overlap.
#[derive(Default)]
struct CountingTier {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    overlapped: AtomicUsize,
}

#[async_trait]
impl BarSource for CountingTier {
    fn name(&self) -> &str {
        "counting"
    }

    fn supports_timeframe(&self, _timeframe: Timeframe) -> bool {
        true
    }

    async fn fetch(&self, _key: &SubscriptionKey, query: &BarQuery) -> Result<Vec<Bar>, SourceError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.fetch_add(1, Ordering::SeqCst);
        }
        let n = i64::try_from(self.calls.fetch_add(1, Ordering::SeqCst)).unwrap() + 1;
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(query.normalize((1..=n).map(|t| bar(t * 60_000)).collect()))
    }
}

struct Client {
    id: ConnectionId,
    dead: bool,
    received: Mutex<Vec<serde_json::Value>>,
}

impl Client {
    fn new(id: ConnectionId, dead: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            dead,
            received: Mutex::new(vec![]),
        })
    }

    fn received(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl Connection for Client {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        if self.dead {
            return Err(DeliveryError::Closed(self.id));
        }
        self.received.lock().push(serde_json::from_str(text).unwrap());
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<(), DeliveryError> {
        Ok(())
    }
}

struct Harness {
    manager: SubscriptionManager,
    locks: Arc<KeyLockManager>,
    connections: Arc<ConnectionRegistry>,
    cache: Arc<MemoryBarCache>,
    live: Arc<CountingTier>,
}

fn harness() -> Harness {
    let cache = Arc::new(MemoryBarCache::new(&CacheSettings {
        ttl: Duration::ZERO,
        max_bars_per_key: 100,
    }));
    let live = Arc::new(CountingTier::default());
    let tiers: Vec<Arc<dyn BarSource>> = vec![
        Arc::clone(&cache) as Arc<dyn BarSource>,
        Arc::clone(&live) as Arc<dyn BarSource>,
    ];
    let locks = Arc::new(KeyLockManager::new());
    let connections = Arc::new(ConnectionRegistry::new());
    let manager = SubscriptionManager::new(
        Arc::new(DataSourceChain::new(tiers)),
        Arc::clone(&locks),
        Arc::clone(&connections),
        PollSettings {
            min_interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(1),
            ..PollSettings::default()
        },
    );

    Harness {
        manager,
        locks,
        connections,
        cache,
        live,
    }
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn many_subscribers_share_one_serialized_loop() {
    let h = harness();
    let clients: Vec<Arc<Client>> = (1..=8).map(|id| Client::new(id, false)).collect();

    let started: usize = clients
        .iter()
        .map(|c| usize::from(h.manager.subscribe(Arc::clone(c) as Arc<dyn Connection>, &key("BTC/USD"))))
        .sum();

    assert_eq!(started, 1);
    assert!(eventually(|| clients.iter().all(|c| c.received() >= 2)).await);
    assert_eq!(h.live.overlapped.load(Ordering::SeqCst), 0);
    assert_eq!(h.manager.stats().listeners, 8);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn live_answers_are_written_back_to_cache() {
    let h = harness();
    let client = Client::new(1, false);
    h.manager.subscribe(Arc::clone(&client) as Arc<dyn Connection>, &key("ETH/USD"));

    assert!(eventually(|| h.cache.bars_for(&key("ETH/USD")).len() >= 2).await);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn dead_client_is_dropped_everywhere() {
    let h = harness();
    let alive = Client::new(1, false);
    let dead = Client::new(2, true);
    h.connections.register(Arc::clone(&alive) as Arc<dyn Connection>);
    h.connections.register(Arc::clone(&dead) as Arc<dyn Connection>);

    h.manager.subscribe(Arc::clone(&alive) as Arc<dyn Connection>, &key("SOL/USD"));
    h.manager.subscribe(Arc::clone(&dead) as Arc<dyn Connection>, &key("SOL/USD"));

    assert!(eventually(|| !h.connections.contains(2)).await);
    assert!(h.connections.contains(1));
    assert_eq!(h.manager.listener_count(&key("SOL/USD")), 1);
    assert!(eventually(|| alive.received() >= 2).await);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn last_unsubscribe_stops_loop_and_frees_lock() {
    let h = harness();
    let client = Client::new(1, false);
    h.manager.subscribe(Arc::clone(&client) as Arc<dyn Connection>, &key("ADA/USD"));
    assert!(eventually(|| h.locks.is_locked(&key("ADA/USD"))).await);

    assert!(h.manager.unsubscribe(1, &key("ADA/USD")));

    assert!(!h.manager.is_active(&key("ADA/USD")));
    assert!(eventually(|| !h.locks.is_locked(&key("ADA/USD"))).await);

    let calls = h.live.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.live.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn keys_are_independent() {
    let h = harness();
    let client = Client::new(1, false);
    h.manager.subscribe(Arc::clone(&client) as Arc<dyn Connection>, &key("BTC/USD"));
    h.manager.subscribe(Arc::clone(&client) as Arc<dyn Connection>, &key("ETH/USD"));

    assert_eq!(h.manager.keys_for(1), vec![key("BTC/USD"), key("ETH/USD")]);

    let stopped = h.manager.remove_connection(1);

    assert_eq!(stopped.len(), 2);
    assert!(h.manager.active_keys().is_empty());
}
