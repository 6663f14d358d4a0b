//! Protocol and subscription error types.

use thiserror::Error;

/// A client message that could not be accepted.
///
/// Most variants are fatal to the connection. [`ProtocolError::InvalidStartPayload`]
/// carries the subscription id and is reported to the client instead.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON envelope of the form `{id?, type, payload?}`.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A message type that must be correlated arrived without an id.
    #[error("'{kind}' message requires an id")]
    MissingId {
        /// Operation type of the offending message.
        kind: String,
    },

    /// A `start` message whose payload is not `{query, operationName?, variables?}`.
    #[error("invalid start payload for '{id}': {message}")]
    InvalidStartPayload {
        /// Client-assigned subscription id.
        id: String,
        /// Decoder message.
        message: String,
    },
}

impl ProtocolError {
    /// Whether the connection has to be terminated.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidStartPayload { .. })
    }

    /// Subscription id the error can be reported against, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::InvalidStartPayload { id, .. } => Some(id),
            Self::Malformed(_) | Self::MissingId { .. } => None,
        }
    }
}

/// The query of a `start` message is not valid GraphQL.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubscriptionParseError {
    /// Parser message, including the position when the parser reports one.
    pub message: String,
}

impl SubscriptionParseError {
    /// Wrap a parser message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_is_fatal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = ProtocolError::Malformed(json_err);
        assert!(err.is_fatal());
        assert!(err.subscription_id().is_none());
        assert!(err.to_string().starts_with("malformed message"));
    }

    #[test]
    fn missing_id_display() {
        let err = ProtocolError::MissingId {
            kind: "start".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "'start' message requires an id");
    }

    #[test]
    fn invalid_start_payload_is_recoverable() {
        let err = ProtocolError::InvalidStartPayload {
            id: "7".into(),
            message: "missing field `query`".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.subscription_id(), Some("7"));
    }

    #[test]
    fn parse_error_display_is_message() {
        let err = SubscriptionParseError::new("unexpected token at 1:3");
        assert_eq!(err.to_string(), "unexpected token at 1:3");
    }
}
