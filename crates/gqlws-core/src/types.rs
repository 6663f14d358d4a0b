//! Wire-level data types shared by the dispatcher, executors and clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ConnectionId;

/// A named event published on the server.
///
/// Events are not persisted. Each one flows through the dispatcher once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, matched against subscription top-level field names.
    pub name: String,
    /// Arbitrary payload injected into the execution context.
    pub payload: Value,
}

impl Event {
    /// Build an event from a name and any JSON-convertible payload.
    pub fn new(name: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// A GraphQL error as sent to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    /// Human-readable message.
    pub message: String,
    /// Response path of the failing field, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
}

impl GraphQlError {
    /// Error with a message and no path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    /// Attach a response path.
    #[must_use]
    pub fn with_path(mut self, path: Vec<Value>) -> Self {
        self.path = Some(path);
        self
    }
}

/// Result of executing one subscription query against one event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Response data (`null` when execution failed before producing any).
    #[serde(default)]
    pub data: Value,
    /// Field-level or request-level errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl ExecutionResult {
    /// Successful result carrying `data`.
    pub fn data(data: Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    /// Failed result with a single error and no data.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            errors: vec![GraphQlError::new(message)],
        }
    }

    /// `true` when the executor reported no errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Request-scoped context captured when a subscription starts.
///
/// Every subscription keeps its own snapshot, so later changes to the
/// connection (for example a second `connection_init`) do not leak into
/// subscriptions that are already running.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Connection the subscription belongs to.
    pub connection_id: ConnectionId,
    /// `User-Agent` header of the upgrade request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Payload of the client's `connection_init`, if one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_params: Option<Value>,
}

impl RequestContext {
    /// Context with no header or init information.
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            user_agent: None,
            connection_params: None,
        }
    }
}
