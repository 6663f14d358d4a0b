//! WebSocket connection state, protocol dispatch, keep-alive and session
//! lifecycle.

pub mod connection;
pub mod handler;
pub mod keepalive;
pub mod session;

pub use connection::{ClientConnection, ConnectionState, TransportError};
