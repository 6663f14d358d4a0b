//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gqlws_core::{ConnectionId, ServerMessage};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ServerConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::subscriptions::ConnectionRegistry;

use super::connection::{ClientConnection, ConnectionState};
use super::handler::{HandleOutcome, handle_message, reject_frame};
use super::keepalive::run_keep_alive;

/// How long cleanup waits for the writer to flush queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub send_queue_capacity: usize,
    /// `ka` interval, `None` when disabled.
    pub keep_alive: Option<Duration>,
}

impl SessionConfig {
    /// Extract session settings from the server config.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            send_queue_capacity: config.send_queue_capacity.max(1),
            keep_alive: config.keep_alive_interval(),
        }
    }
}

/// Run a `graphql-ws` session for an upgraded socket.
///
/// 1. Registers the connection (`Connecting` → `Open`)
/// 2. Spawns the writer task draining the outbound queue
/// 3. Reads frames one at a time and hands them to [`handle_message`]
/// 4. Starts keep-alive after the first `connection_init`
/// 5. On shutdown, removes the connection and sends `complete` for every
///    subscription it had
/// 6. Removes the connection, flushes the writer and closes the socket
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    user_agent: Option<String>,
    registry: Arc<ConnectionRegistry>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(connection_id, send_tx, user_agent));

    registry.register(connection.clone()).await;
    connection.set_state(ConnectionState::Open);
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Outbound writer: the only task touching the socket sink.
    let writer_conn = connection.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        writer_conn.close();
                        break;
                    }
                }
                () = writer_conn.closed() => {
                    while let Ok(text) = send_rx.try_recv() {
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let mut keep_alive = None;
    let mut released = 0;

    let reason = loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = connection.closed() => break "closed by server",
            () = shutdown.cancelled() => {
                // Removal retires every subscription first, so no `data`
                // can follow its `complete`.
                let mut ids: Vec<String> = registry
                    .remove_connection(&connection.id)
                    .await
                    .map(|removed| removed.subscriptions.iter().map(|s| s.id.clone()).collect())
                    .unwrap_or_default();
                ids.sort();
                released = ids.len();
                for id in ids {
                    if connection.send(&ServerMessage::Complete { id }).await.is_err() {
                        break;
                    }
                }
                break "server shutdown";
            }
        };

        let outcome = match frame {
            None => break "stream ended",
            Some(Err(e)) => {
                debug!(error = %e, "read error");
                break "read error";
            }
            Some(Ok(Message::Text(text))) => {
                handle_message(text.as_str(), &connection, &registry).await
            }
            Some(Ok(Message::Binary(data))) => {
                match std::str::from_utf8(&data) {
                    Ok(text) => handle_message(text, &connection, &registry).await,
                    Err(e) => {
                        let reason = format!("malformed message: binary frame is not UTF-8: {e}");
                        reject_frame(reason, &connection).await
                    }
                }
            }
            Some(Ok(Message::Close(_))) => break "client close",
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
        };

        match outcome {
            HandleOutcome::Continue => {}
            HandleOutcome::Acknowledged => {
                if let (Some(interval), None) = (config.keep_alive, keep_alive.as_ref()) {
                    keep_alive = Some(tokio::spawn(run_keep_alive(connection.clone(), interval)));
                }
            }
            HandleOutcome::Terminate => break "terminated",
        }
    };

    // Clean up
    connection.set_state(ConnectionState::Closing);
    if let Some(removed) = registry.remove_connection(&connection.id).await {
        released = removed.subscriptions.len();
    }
    connection.close();
    if let Some(handle) = keep_alive {
        handle.abort();
    }
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    connection.set_state(ConnectionState::Closed);

    info!(
        reason,
        subscriptions = released,
        duration_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}
