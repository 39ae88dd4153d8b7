//! Test doubles shared by the application service tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{BarSource, Connection, DeliveryError, SourceError};
use crate::domain::market::{Bar, BarQuery, SubscriptionKey, Timeframe};
use crate::domain::subscription::ConnectionId;

pub fn bar(timestamp: i64) -> Bar {
    Bar {
        timestamp,
        open: 1.0,
        high: 2.0,
        low: 0.5,
        close: 1.5,
        volume: 10.0,
    }
}

pub fn key(symbol: &str) -> SubscriptionKey {
    SubscriptionKey::new("crypto", "kraken", symbol, Timeframe::OneMinute).unwrap()
}

#[derive(Debug, Clone)]
enum Reply {
    Bars(Vec<Bar>),
    Fail,
}

/// Tier that replays scripted replies; the last reply repeats forever.
pub struct ScriptedSource {
    name: String,
    queue: Mutex<VecDeque<Reply>>,
    last: Mutex<Reply>,
    timeframes: Mutex<Option<Vec<Timeframe>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    written: Mutex<Vec<Bar>>,
}

impl ScriptedSource {
    fn with_replies(name: &str, replies: Vec<Reply>) -> Arc<Self> {
        let mut queue: VecDeque<Reply> = replies.into();
        let last = queue.pop_back().unwrap_or(Reply::Bars(vec![]));
        Arc::new(Self {
            name: name.to_string(),
            queue: Mutex::new(queue),
            last: Mutex::new(last),
            timeframes: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            written: Mutex::new(vec![]),
        })
    }

    pub fn returning(name: &str, bars: Vec<Bar>) -> Arc<Self> {
        Self::with_replies(name, vec![Reply::Bars(bars)])
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::with_replies(name, vec![Reply::Fail])
    }

    /// Successive fetches return each batch in turn; `None` is a failure.
    pub fn sequence(name: &str, batches: Vec<Option<Vec<Bar>>>) -> Arc<Self> {
        let replies = batches
            .into_iter()
            .map(|batch| batch.map_or(Reply::Fail, Reply::Bars))
            .collect();
        Self::with_replies(name, replies)
    }

    pub fn with_timeframes(self: Arc<Self>, timeframes: &[Timeframe]) -> Arc<Self> {
        *self.timeframes.lock() = Some(timeframes.to_vec());
        self
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = delay;
        self
    }

    pub fn tier(self: &Arc<Self>) -> Arc<dyn BarSource> {
        Arc::clone(self) as Arc<dyn BarSource>
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Bar> {
        self.written.lock().clone()
    }

    fn next_reply(&self) -> Reply {
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().clone())
    }
}

#[async_trait]
impl BarSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_timeframe(&self, timeframe: Timeframe) -> bool {
        self.timeframes
            .lock()
            .as_ref()
            .is_none_or(|supported| supported.contains(&timeframe))
    }

    async fn fetch(&self, key: &SubscriptionKey, _query: &BarQuery) -> Result<Vec<Bar>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.next_reply() {
            Reply::Bars(bars) => Ok(bars),
            Reply::Fail => Err(SourceError::Unavailable {
                tier: self.name.clone(),
                message: format!("scripted failure for {key}"),
            }),
        }
    }

    async fn write_back(&self, _key: &SubscriptionKey, bars: &[Bar]) -> Result<(), SourceError> {
        self.written.lock().extend_from_slice(bars);
        Ok(())
    }
}

/// Connection that records what it was sent.
pub struct RecordingConnection {
    id: ConnectionId,
    fail_send: bool,
    sent: Mutex<Vec<String>>,
    closed_with: Mutex<Option<u16>>,
}

impl RecordingConnection {
    pub fn new(id: ConnectionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail_send: false,
            sent: Mutex::new(vec![]),
            closed_with: Mutex::new(None),
        })
    }

    pub fn failing(id: ConnectionId) -> Arc<Self> {
        Arc::new(Self {
            id,
            fail_send: true,
            sent: Mutex::new(vec![]),
            closed_with: Mutex::new(None),
        })
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn Connection> {
        Arc::clone(self) as Arc<dyn Connection>
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock()
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        if self.fail_send {
            return Err(DeliveryError::Closed(self.id));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self, code: u16, _reason: &str) -> Result<(), DeliveryError> {
        *self.closed_with.lock() = Some(code);
        Ok(())
    }
}
