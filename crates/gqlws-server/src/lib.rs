//! # gqlws-server
//!
//! Axum WebSocket server and the subscription engine behind it.
//!
//! - `graphql-ws` sessions: handshake, `start`/`stop`, keep-alive, cleanup
//! - Connection registry with an event-name index
//! - Event dispatcher that re-executes subscription queries per event
//! - Publisher handle for producers, backpressured through a bounded queue
//! - `/health` and optional Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod graphql;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod subscriptions;
pub mod websocket;

pub use config::ServerConfig;
pub use graphql::{
    AsyncGraphqlParser, EventPayload, ExecutionContext, ExecutionError, ExecutionRequest,
    Executor, ParsedOperation, QueryParser, SchemaExecutor,
};
pub use server::GqlWsServer;
pub use subscriptions::{
    ConnectionRegistry, EventDispatcher, EventPublisher, PublishError, RegistryError,
    Subscription, SubscriptionMatch,
};
