//! `graphql-ws` message protocol.
//!
//! Every frame is a JSON envelope `{"id"?: string, "type": string, "payload"?: any}`.
//! Client frames are decoded in two steps: the envelope first, then the
//! payload once the operation type is known. Server frames are a tagged enum
//! that serializes straight into the envelope shape.
//!
//! | type | direction |
//! |------|-----------|
//! | `connection_init` | client → server |
//! | `connection_ack` | server → client |
//! | `connection_error` | server → client |
//! | `ka` | server → client |
//! | `connection_terminate` | client → server |
//! | `start` | client → server |
//! | `data` | server → client |
//! | `error` | server → client |
//! | `complete` | server → client |
//! | `stop` | client → server |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::types::{ExecutionResult, GraphQlError};

/// WebSocket sub-protocol negotiated on upgrade.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// The operation vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// `connection_init`
    ConnectionInit,
    /// `connection_ack`
    ConnectionAck,
    /// `connection_error`
    ConnectionError,
    /// `ka`
    KeepAlive,
    /// `connection_terminate`
    ConnectionTerminate,
    /// `start`
    Start,
    /// `data`
    Data,
    /// `error`
    Error,
    /// `complete`
    Complete,
    /// `stop`
    Stop,
}

impl OperationType {
    /// Wire string of this operation type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::KeepAlive => "ka",
            Self::ConnectionTerminate => "connection_terminate",
            Self::Start => "start",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Stop => "stop",
        }
    }

    /// Parse a wire string. Returns `None` for types outside the vocabulary.
    pub fn from_wire(kind: &str) -> Option<Self> {
        let op = match kind {
            "connection_init" => Self::ConnectionInit,
            "connection_ack" => Self::ConnectionAck,
            "connection_error" => Self::ConnectionError,
            "ka" => Self::KeepAlive,
            "connection_terminate" => Self::ConnectionTerminate,
            "start" => Self::Start,
            "data" => Self::Data,
            "error" => Self::Error,
            "complete" => Self::Complete,
            "stop" => Self::Stop,
            _ => return None,
        };
        Some(op)
    }

    /// Whether clients are allowed to send this type.
    pub fn is_client_message(self) -> bool {
        matches!(
            self,
            Self::ConnectionInit | Self::ConnectionTerminate | Self::Start | Self::Stop
        )
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw frame before the payload is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// Payload of a `start` message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    /// GraphQL document text.
    pub query: String,
    /// Operation to run when the document holds several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variable values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl StartPayload {
    /// Payload with only a query.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }
}

/// A decoded client → server message.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// `connection_init` with optional connection params.
    ConnectionInit {
        /// Connection params, `None` when absent or `null`.
        payload: Option<Value>,
    },
    /// `start` a subscription.
    Start {
        /// Client-assigned subscription id.
        id: String,
        /// Query, operation name and variables.
        payload: StartPayload,
    },
    /// `stop` a subscription.
    Stop {
        /// Client-assigned subscription id.
        id: String,
    },
    /// `connection_terminate`.
    ConnectionTerminate,
    /// Any type clients are not expected to send.
    Unknown {
        /// Id, if the frame carried one.
        id: Option<String>,
        /// Wire type string as received.
        kind: String,
    },
}

impl ClientMessage {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let Envelope { id, kind, payload } =
            serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

        let Some(op) = OperationType::from_wire(&kind).filter(|op| op.is_client_message()) else {
            return Ok(Self::Unknown { id, kind });
        };

        match op {
            OperationType::ConnectionInit => Ok(Self::ConnectionInit {
                payload: payload.filter(|p| !p.is_null()),
            }),
            OperationType::Start => {
                let id = id.ok_or(ProtocolError::MissingId { kind })?;
                match serde_json::from_value(payload.unwrap_or(Value::Null)) {
                    Ok(payload) => Ok(Self::Start { id, payload }),
                    Err(e) => Err(ProtocolError::InvalidStartPayload {
                        id,
                        message: e.to_string(),
                    }),
                }
            }
            OperationType::Stop => {
                let id = id.ok_or(ProtocolError::MissingId { kind })?;
                Ok(Self::Stop { id })
            }
            OperationType::ConnectionTerminate => Ok(Self::ConnectionTerminate),
            _ => Ok(Self::Unknown { id, kind }),
        }
    }

    /// Wire type string, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::ConnectionInit { .. } => OperationType::ConnectionInit.as_str(),
            Self::Start { .. } => OperationType::Start.as_str(),
            Self::Stop { .. } => OperationType::Stop.as_str(),
            Self::ConnectionTerminate => OperationType::ConnectionTerminate.as_str(),
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// A server → client message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `connection_init`.
    ConnectionAck,
    /// Connection-level failure, sent right before the server closes.
    ConnectionError {
        /// What went wrong.
        payload: GraphQlError,
    },
    /// Periodic keep-alive.
    #[serde(rename = "ka")]
    KeepAlive,
    /// Execution result for a subscription.
    Data {
        /// Client-assigned subscription id.
        id: String,
        /// Execution result.
        payload: ExecutionResult,
    },
    /// Errors for a subscription (parse failure or execution errors).
    Error {
        /// Client-assigned subscription id.
        id: String,
        /// Errors.
        payload: Vec<GraphQlError>,
    },
    /// The subscription will not produce further data.
    Complete {
        /// Client-assigned subscription id.
        id: String,
    },
}

impl ServerMessage {
    /// Operation type of this message.
    pub fn kind(&self) -> OperationType {
        match self {
            Self::ConnectionAck => OperationType::ConnectionAck,
            Self::ConnectionError { .. } => OperationType::ConnectionError,
            Self::KeepAlive => OperationType::KeepAlive,
            Self::Data { .. } => OperationType::Data,
            Self::Error { .. } => OperationType::Error,
            Self::Complete { .. } => OperationType::Complete,
        }
    }

    /// Subscription id the message is correlated with.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Data { id, .. } | Self::Error { id, .. } | Self::Complete { id } => Some(id),
            Self::ConnectionAck | Self::ConnectionError { .. } | Self::KeepAlive => None,
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
