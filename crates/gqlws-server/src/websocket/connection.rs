//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use gqlws_core::{ConnectionId, RequestContext, ServerMessage};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet registered.
    Connecting,
    /// Registered and reading frames.
    Open,
    /// Cleanup in progress.
    Closing,
    /// Removed from the registry, writer stopped.
    Closed,
}

/// Writing to a connection failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The writer task is gone.
    #[error("connection closed")]
    Closed,
    /// The outbound queue stayed full for the whole delivery timeout.
    #[error("outbound queue full for {0:?}")]
    Timeout(Duration),
    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A connected WebSocket client.
///
/// Outbound frames go through a bounded queue drained by the session's
/// writer task, so every write to the socket is serialized.
pub struct ClientConnection {
    /// Server-assigned connection id.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    state: Mutex<ConnectionState>,
    close: CancellationToken,
    user_agent: Option<String>,
    init_params: Mutex<Option<Value>>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, user_agent: Option<String>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            state: Mutex::new(ConnectionState::Connecting),
            close: CancellationToken::new(),
            user_agent,
            init_params: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `state`.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Store the `connection_init` payload for later subscriptions.
    pub fn set_init_params(&self, params: Option<Value>) {
        *self.init_params.lock() = params;
    }

    /// Snapshot of the request context for a new subscription.
    pub fn context_snapshot(&self) -> RequestContext {
        RequestContext {
            connection_id: self.id.clone(),
            user_agent: self.user_agent.clone(),
            connection_params: self.init_params.lock().clone(),
        }
    }

    /// Ask the session to close. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether a close was requested.
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once a close was requested.
    pub async fn closed(&self) {
        self.close.cancelled().await;
    }

    /// Enqueue a message, waiting for queue space.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        let text = Arc::new(message.to_json()?);
        self.tx.send(text).await.map_err(|_| TransportError::Closed)
    }

    /// Enqueue a message, waiting at most `timeout` for queue space.
    pub async fn deliver(
        &self,
        message: &ServerMessage,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let text = Arc::new(message.to_json()?);
        match self.tx.send_timeout(text, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Timeout(timeout))
            }
            Err(SendTimeoutError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Messages dropped because the queue stayed full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), tx, Some("test-agent".into()));
        (conn, rx)
    }

    #[test]
    fn new_connection_is_connecting() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.id.as_str(), "conn_1");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.is_closed());
    }

    #[test]
    fn state_transitions() {
        let (conn, _rx) = make_connection(4);
        conn.set_state(ConnectionState::Open);
        assert_eq!(conn.state(), ConnectionState::Open);
        conn.set_state(ConnectionState::Closed);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn context_snapshot_captures_init_params() {
        let (conn, _rx) = make_connection(4);
        let before = conn.context_snapshot();
        assert!(before.connection_params.is_none());
        assert_eq!(before.user_agent.as_deref(), Some("test-agent"));

        conn.set_init_params(Some(json!({"token": "t"})));
        let after = conn.context_snapshot();
        assert_eq!(after.connection_params, Some(json!({"token": "t"})));
        // earlier snapshots are unaffected
        assert!(before.connection_params.is_none());
    }

    #[tokio::test]
    async fn send_serializes_message() {
        let (conn, mut rx) = make_connection(4);
        conn.send(&ServerMessage::ConnectionAck).await.unwrap();
        let text = rx.recv().await.unwrap();
        assert_eq!(&*text, r#"{"type":"connection_ack"}"#);
    }

    #[tokio::test]
    async fn send_to_closed_channel_fails() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        let err = conn.send(&ServerMessage::KeepAlive).await.unwrap_err();
        assert_matches!(err, TransportError::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_times_out_on_full_queue() {
        let (conn, _rx) = make_connection(1);
        let msg = ServerMessage::Complete { id: "1".into() };
        conn.deliver(&msg, Duration::from_millis(50)).await.unwrap();
        let err = conn.deliver(&msg, Duration::from_millis(50)).await.unwrap_err();
        assert_matches!(err, TransportError::Timeout(_));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn deliver_after_drain_succeeds() {
        let (conn, mut rx) = make_connection(1);
        let msg = ServerMessage::Complete { id: "1".into() };
        conn.deliver(&msg, Duration::from_millis(50)).await.unwrap();
        let _ = rx.recv().await.unwrap();
        conn.deliver(&msg, Duration::from_millis(50)).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_wakes_waiters() {
        let (conn, _rx) = make_connection(4);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        conn.close();
        waiter.await.unwrap();
        assert!(conn.is_closed());
    }
}
