//! Protocol dispatch for one client frame.

use std::sync::Arc;

use gqlws_core::{ClientMessage, GraphQlError, ProtocolError, ServerMessage};
use tracing::{debug, instrument, warn};

use crate::subscriptions::{ConnectionRegistry, RegistryError};

use super::connection::ClientConnection;

/// What the session should do after a frame was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Keep reading.
    Continue,
    /// `connection_init` was acknowledged.
    Acknowledged,
    /// Close the connection.
    Terminate,
}

/// Handle an incoming text frame.
///
/// Replies are enqueued on the connection. A reply that cannot be enqueued
/// ends the session.
#[instrument(skip_all, fields(conn_id = %connection.id, kind))]
pub async fn handle_message(
    text: &str,
    connection: &ClientConnection,
    registry: &ConnectionRegistry,
) -> HandleOutcome {
    let message = match ClientMessage::decode(text) {
        Ok(message) => message,
        Err(err) => return handle_protocol_error(err, connection).await,
    };
    let _ = tracing::Span::current().record("kind", message.kind());

    match message {
        ClientMessage::ConnectionInit { payload } => {
            connection.set_init_params(payload);
            reply(connection, ServerMessage::ConnectionAck, HandleOutcome::Acknowledged).await
        }
        ClientMessage::Start { id, payload } => {
            let context = Arc::new(connection.context_snapshot());
            match registry
                .add_subscription(&connection.id, id.clone(), payload, context)
                .await
            {
                Ok(_) => HandleOutcome::Continue,
                Err(RegistryError::Parse(e)) => {
                    debug!(sub_id = %id, error = %e, "rejected subscription query");
                    let msg = ServerMessage::Error {
                        id,
                        payload: vec![GraphQlError::new(e.message)],
                    };
                    reply(connection, msg, HandleOutcome::Continue).await
                }
                Err(RegistryError::ConnectionNotFound(_)) => {
                    debug!(sub_id = %id, "start on a removed connection");
                    HandleOutcome::Terminate
                }
            }
        }
        ClientMessage::Stop { id } => {
            if registry.remove_subscription(&connection.id, &id).await {
                reply(connection, ServerMessage::Complete { id }, HandleOutcome::Continue).await
            } else {
                debug!(sub_id = %id, "stop for unknown subscription");
                HandleOutcome::Continue
            }
        }
        ClientMessage::ConnectionTerminate => {
            debug!("client terminated connection");
            HandleOutcome::Terminate
        }
        ClientMessage::Unknown { id, kind } => {
            warn!(kind = %kind, id = ?id, "ignoring unexpected message type");
            HandleOutcome::Continue
        }
    }
}

async fn handle_protocol_error(err: ProtocolError, connection: &ClientConnection) -> HandleOutcome {
    if let Some(id) = err.subscription_id().filter(|_| !err.is_fatal()) {
        debug!(sub_id = %id, error = %err, "invalid start payload");
        let msg = ServerMessage::Error {
            id: id.to_owned(),
            payload: vec![GraphQlError::new(err.to_string())],
        };
        return reply(connection, msg, HandleOutcome::Continue).await;
    }
    reject_frame(err.to_string(), connection).await
}

/// Answer an undecodable frame with `connection_error` and end the session.
///
/// The reply is best effort: the connection closes either way.
pub async fn reject_frame(reason: String, connection: &ClientConnection) -> HandleOutcome {
    warn!(conn_id = %connection.id, error = %reason, "protocol violation, closing connection");
    let msg = ServerMessage::ConnectionError {
        payload: GraphQlError::new(reason),
    };
    let _ = connection.send(&msg).await;
    HandleOutcome::Terminate
}

async fn reply(
    connection: &ClientConnection,
    message: ServerMessage,
    outcome: HandleOutcome,
) -> HandleOutcome {
    match connection.send(&message).await {
        Ok(()) => outcome,
        Err(e) => {
            debug!(error = %e, "failed to enqueue reply");
            HandleOutcome::Terminate
        }
    }
}
