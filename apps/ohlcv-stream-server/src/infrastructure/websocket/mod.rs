//! WebSocket Stream Server
//!
//! Client entry point. A client opens `GET /ws?market=..&symbols=..` and
//! receives one update envelope per new bar for each subscribed key. Each
//! socket gets a writer task, a heartbeat and an entry in the connection
//! registry; the session cleans all of it up when the socket goes away.
//! At shutdown the session ends once its close frame has been written.

pub mod connection;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use self::connection::{Outbound, WsConnection, run_writer};
pub use self::protocol::{
    CLOSE_POLICY_VIOLATION, ControlMessage, MISSING_PARAMS, Reply, SHUTTING_DOWN, StreamScope, SubscribeRequest,
    WsParams,
};
use crate::application::ports::{CLOSE_GOING_AWAY, Connection};
use crate::domain::market::SubscriptionKey;
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::config::AppState;

/// Build the `/ws` router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

fn next_connection_id() -> ConnectionId {
    Uuid::new_v4().as_u64_pair().0
}

async fn reject(mut socket: WebSocket, error: String) {
    tracing::info!(error = %error, "Rejected subscribe request");
    let _ = socket.send(Message::Text(Reply::error(error).to_json().into())).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "invalid request".into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, params: WsParams) {
    let request = match SubscribeRequest::from_params(&params) {
        Ok(request) => request,
        Err(error) => return reject(socket, error).await,
    };

    let id = next_connection_id();
    let delivery = &state.config().delivery;
    let (connection, rx) = WsConnection::new(id, delivery.queue_capacity, delivery.send_timeout);
    let connection = Arc::new(connection);
    let handle: Arc<dyn Connection> = Arc::clone(&connection) as Arc<dyn Connection>;

    let (sink, mut stream) = socket.split();
    let writer_done = CancellationToken::new();
    let writer = tokio::spawn(run_writer(id, sink, rx, writer_done.clone()));

    // A concurrent shutdown either closes this connection in `close_all` or is seen here.
    state.connections().register(Arc::clone(&handle));
    if state.is_shut_down() {
        tracing::info!(connection_id = id, "Connection refused during shutdown");
        state.connections().unregister(id);
        let _ = handle.send_text(&Reply::error(SHUTTING_DOWN).to_json()).await;
        let _ = handle.close(CLOSE_GOING_AWAY, "server shutting down").await;
        drop(handle);
        drop(connection);
        if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
            tracing::debug!(connection_id = id, "Writer still draining after refusal");
        }
        return;
    }
    tracing::info!(
        connection_id = id,
        market = %request.scope.market,
        provider = %request.scope.provider,
        keys = request.keys.len(),
        "Client connected"
    );

    let session = Session {
        id,
        scope: request.scope,
        handle,
        state: Arc::clone(&state),
    };
    session.subscribe_keys(&request.keys).await;

    let heartbeat = &state.config().heartbeat;
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            () = writer_done.cancelled() => break,
            _ = ticker.tick() => {
                if last_seen.elapsed() > heartbeat.timeout {
                    tracing::info!(connection_id = id, "Heartbeat timeout, closing connection");
                    let _ = session.handle.close(CLOSE_GOING_AWAY, "heartbeat timeout").await;
                    break;
                }
                if !connection.ping() {
                    tracing::debug!(connection_id = id, "Ping not queued");
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        session.handle_text(text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                }
            }
        }
    }

    session.cleanup();
    drop(session);
    drop(connection);

    // Let a queued close frame flush; the writer ends once every handle is gone.
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        tracing::debug!(connection_id = id, "Writer still draining after disconnect");
    }
}

struct Session {
    id: ConnectionId,
    scope: StreamScope,
    handle: Arc<dyn Connection>,
    state: Arc<AppState>,
}

impl Session {
    async fn reply(&self, reply: Reply) {
        if let Err(e) = self.handle.send_text(&reply.to_json()).await {
            tracing::debug!(connection_id = self.id, error = %e, "Failed to send reply");
        }
    }

    async fn subscribe_keys(&self, keys: &[SubscriptionKey]) {
        let subscriptions = self.state.subscriptions();
        for key in keys {
            let started = subscriptions.subscribe(Arc::clone(&self.handle), key);
            tracing::debug!(connection_id = self.id, key = %key, started, "Subscribed");
        }

        if subscriptions.is_closed() {
            self.reply(Reply::error(SHUTTING_DOWN)).await;
            return;
        }
        let listening = subscriptions.keys_for(self.id);
        let accepted: Vec<SubscriptionKey> = keys.iter().filter(|key| listening.contains(key)).cloned().collect();
        self.reply(Reply::subscribed(&accepted)).await;
    }

    async fn handle_text(&self, text: &str) {
        let message: ControlMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                self.reply(Reply::error(format!("Invalid message: {e}"))).await;
                return;
            }
        };

        let (symbols, timeframe, subscribe) = match &message {
            ControlMessage::Subscribe { symbols, timeframe } => (symbols, timeframe, true),
            ControlMessage::Unsubscribe { symbols, timeframe } => (symbols, timeframe, false),
        };

        let keys = match protocol::parse_timeframe(timeframe.as_deref())
            .and_then(|tf| self.scope.keys(symbols.iter().map(String::as_str), tf))
        {
            Ok(keys) => keys,
            Err(error) => {
                self.reply(Reply::error(error)).await;
                return;
            }
        };

        if subscribe {
            self.subscribe_keys(&keys).await;
        } else {
            let subscriptions = self.state.subscriptions();
            for key in &keys {
                let stopped = subscriptions.unsubscribe(self.id, key);
                tracing::debug!(connection_id = self.id, key = %key, stopped, "Unsubscribed");
            }
            self.reply(Reply::unsubscribed(&keys)).await;
        }
    }

    fn cleanup(&self) {
        let stopped = self.state.subscriptions().remove_connection(self.id);
        self.state.connections().unregister(self.id);
        tracing::info!(connection_id = self.id, stopped_loops = stopped.len(), "Client disconnected");
    }
}

// =============================================================================
// Stream Server
// =============================================================================

/// WebSocket server for bar subscriptions.
pub struct StreamServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Create a server on `port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if binding fails or the server stops
    /// with an error.
    pub async fn run(self) -> Result<(), StreamServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Stream server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
