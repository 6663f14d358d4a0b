//! An active subscription.

use std::collections::BTreeSet;
use std::sync::Arc;

use gqlws_core::{ConnectionId, RequestContext, StartPayload};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

/// A `start` accepted on a connection.
///
/// Immutable once registered; a second `start` with the same id replaces the
/// whole value.
#[derive(Debug)]
pub struct Subscription {
    /// Client-assigned id, unique per connection.
    pub id: String,
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Document text.
    pub query: String,
    /// Operation to run.
    pub operation_name: Option<String>,
    /// Variable values.
    pub variables: Option<Map<String, Value>>,
    /// Top-level field names; the events this subscription listens to.
    pub events: BTreeSet<String>,
    /// Request context captured at `start`.
    pub context: Arc<RequestContext>,
    /// `true` until the subscription is retired. Results are enqueued while
    /// holding it, so nothing is enqueued after `retire` returns.
    gate: Mutex<bool>,
}

impl Subscription {
    /// Build an active subscription from a `start` payload.
    pub fn new(
        id: String,
        connection_id: ConnectionId,
        request: StartPayload,
        events: BTreeSet<String>,
        context: Arc<RequestContext>,
    ) -> Self {
        Self {
            id,
            connection_id,
            query: request.query,
            operation_name: request.operation_name,
            variables: request.variables,
            events,
            context,
            gate: Mutex::new(true),
        }
    }

    /// Whether an event named `name` concerns this subscription.
    pub fn listens_to(&self, name: &str) -> bool {
        self.events.contains(name)
    }

    /// Hold the delivery gate. The guard derefs to `false` once retired.
    pub async fn delivery_gate(&self) -> MutexGuard<'_, bool> {
        self.gate.lock().await
    }

    /// Stop delivering results. Waits for an in-flight enqueue to finish.
    pub async fn retire(&self) {
        *self.gate.lock().await = false;
    }

    /// Whether results are still delivered.
    pub async fn is_active(&self) -> bool {
        *self.gate.lock().await
    }
}
