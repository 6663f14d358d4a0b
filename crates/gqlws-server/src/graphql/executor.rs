//! Execution seam.

use std::sync::Arc;

use async_trait::async_trait;
use gqlws_core::{ExecutionResult, RequestContext};
use serde_json::{Map, Value};
use thiserror::Error;

/// The published event payload, made available to resolvers.
///
/// With [`SchemaExecutor`](super::SchemaExecutor) resolvers read it through
/// `ctx.data::<EventPayload>()`.
#[derive(Clone, Debug, PartialEq)]
pub struct EventPayload(pub Value);

/// Per-execution context: the subscription's request snapshot plus the
/// payload of the event being dispatched.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    /// Captured when the subscription started.
    pub request: Arc<RequestContext>,
    /// Payload of the event being dispatched.
    pub payload: Value,
}

/// One execution of a subscription query.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// Document text.
    pub query: String,
    /// Operation to run.
    pub operation_name: Option<String>,
    /// Variable values.
    pub variables: Option<Map<String, Value>>,
    /// Request snapshot and event payload.
    pub context: ExecutionContext,
}

/// The executor could not produce a result at all.
///
/// Field-level failures are not errors here; they are reported in
/// [`ExecutionResult::errors`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The engine returned without a response.
    #[error("execution produced no result")]
    NoResult,
    /// Engine-specific failure.
    #[error("execution failed: {0}")]
    Engine(String),
}

/// Executes subscription queries against published events.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `request` once and return its result.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError>;
}
