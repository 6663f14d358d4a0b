//! Periodic `ka` messages after the handshake.

use std::sync::Arc;
use std::time::Duration;

use gqlws_core::ServerMessage;
use tokio::time;

use super::connection::ClientConnection;

/// Outcome of the keep-alive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveResult {
    /// The connection was asked to close.
    Closed,
    /// A `ka` could not be enqueued (writer gone).
    SendFailed,
}

/// Send `ka` right away and then at every `interval` until the connection
/// closes.
pub async fn run_keep_alive(connection: Arc<ClientConnection>, interval: Duration) -> KeepAliveResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.send(&ServerMessage::KeepAlive).await.is_err() {
                    return KeepAliveResult::SendFailed;
                }
            }
            () = connection.closed() => {
                return KeepAliveResult::Closed;
            }
        }
    }
}
