//! # gqlws-core
//!
//! Foundation types shared by the subscription server and its clients.
//!
//! - **Protocol**: `ClientMessage` / `ServerMessage` for the `graphql-ws`
//!   operation vocabulary, decoded as a tagged envelope
//! - **Wire types**: `Event`, `ExecutionResult`, `GraphQlError`, `RequestContext`
//! - **Ids**: `ConnectionId` newtype
//! - **Errors**: `ProtocolError`, `SubscriptionParseError`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod types;

pub use errors::{ProtocolError, SubscriptionParseError};
pub use ids::ConnectionId;
pub use protocol::{ClientMessage, ServerMessage, StartPayload, SUBPROTOCOL};
pub use types::{Event, ExecutionResult, GraphQlError, RequestContext};
