//! WebSocket connection handle.
//!
//! Outbound frames go through a bounded queue drained by a dedicated writer
//! task, so a slow client only ever blocks its own sends, and only up to the
//! send timeout.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connection, DeliveryError};
use crate::domain::subscription::ConnectionId;

/// Frame queued for the writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Text message.
    Text(String),
    /// Heartbeat ping.
    Ping,
    /// Close frame; the writer stops after sending it.
    Close {
        /// WebSocket status code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Server side of one client socket.
#[derive(Debug)]
pub struct WsConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    send_timeout: Duration,
}

impl WsConnection {
    /// Create a handle and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                tx,
                send_timeout,
            },
            rx,
        )
    }

    /// Queue a ping without waiting. Returns `false` if the queue is full or closed.
    pub fn ping(&self) -> bool {
        self.tx.try_send(Outbound::Ping).is_ok()
    }

    async fn enqueue(&self, frame: Outbound) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.send_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed(self.id)),
            Err(_) => Err(DeliveryError::Timeout(self.id)),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        self.enqueue(Outbound::Text(text.to_string())).await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), DeliveryError> {
        self.enqueue(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
        .await
    }
}

/// Drain `rx` into `sink` until the queue closes, a close frame is sent or
/// the socket fails. Cancels `done` on exit.
pub async fn run_writer<S>(id: ConnectionId, mut sink: S, mut rx: mpsc::Receiver<Outbound>, done: CancellationToken)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if let Err(e) = sink.send(message).await {
            tracing::debug!(connection_id = id, error = %e, "WebSocket write failed");
            break;
        }
        if last {
            break;
        }
    }

    rx.close();
    done.cancel();
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn send_text_reaches_writer() {
        let (connection, rx) = WsConnection::new(1, 4, Duration::from_millis(50));
        let (sink, mut out) = fmpsc::unbounded::<Message>();
        let done = CancellationToken::new();
        let writer = tokio::spawn(run_writer(1, sink, rx, done.clone()));

        connection.send_text("hello").await.unwrap();
        connection.close(1001, "bye").await.unwrap();
        writer.await.unwrap();

        assert!(matches!(out.next().await, Some(Message::Text(t)) if t.as_str() == "hello"));
        assert!(matches!(out.next().await, Some(Message::Close(Some(frame))) if frame.code == 1001));
        assert!(done.is_cancelled());
    }

    #[tokio::test]
    async fn full_queue_times_out() {
        let (connection, _rx) = WsConnection::new(2, 1, Duration::from_millis(20));
        connection.send_text("first").await.unwrap();

        let err = connection.send_text("second").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Timeout(2)));
    }

    #[tokio::test]
    async fn closed_queue_is_closed_error() {
        let (connection, rx) = WsConnection::new(3, 4, Duration::from_millis(20));
        drop(rx);

        let err = connection.send_text("late").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Closed(3)));
        assert!(!connection.ping());
    }
}
