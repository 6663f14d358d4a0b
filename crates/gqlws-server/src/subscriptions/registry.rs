//! Live connections, their subscriptions, and an event-name index.
//!
//! All three live behind one `RwLock` so a connection and its subscriptions
//! disappear together. Matching takes the read lock, clones `Arc`s into a
//! snapshot and releases it before anything is executed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use gqlws_core::{ConnectionId, RequestContext, StartPayload, SubscriptionParseError};
use metrics::gauge;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::graphql::{AsyncGraphqlParser, QueryParser, event_names};
use crate::metrics::SUBSCRIPTIONS_ACTIVE;
use crate::websocket::ClientConnection;

use super::subscription::Subscription;

/// Registry operation failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The `start` query is not valid GraphQL.
    #[error(transparent)]
    Parse(#[from] SubscriptionParseError),
    /// The connection was already removed.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),
}

/// One subscription matched by an event, with the connection to deliver to.
#[derive(Clone, Debug)]
pub struct SubscriptionMatch {
    /// Owning connection.
    pub connection: Arc<ClientConnection>,
    /// The matched subscription.
    pub subscription: Arc<Subscription>,
}

/// What [`ConnectionRegistry::remove_connection`] took out.
#[derive(Debug)]
pub struct RemovedConnection {
    /// The connection.
    pub connection: Arc<ClientConnection>,
    /// Its subscriptions at removal time.
    pub subscriptions: Vec<Arc<Subscription>>,
}

struct ConnectionEntry {
    connection: Arc<ClientConnection>,
    subscriptions: HashMap<String, Arc<Subscription>>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_event: HashMap<String, BTreeSet<(ConnectionId, String)>>,
    subscription_count: usize,
}

impl RegistryState {
    fn index(&mut self, sub: &Subscription) {
        for event in &sub.events {
            let _ = self
                .by_event
                .entry(event.clone())
                .or_default()
                .insert((sub.connection_id.clone(), sub.id.clone()));
        }
    }

    fn unindex(&mut self, sub: &Subscription) {
        let key = (sub.connection_id.clone(), sub.id.clone());
        for event in &sub.events {
            if let Some(keys) = self.by_event.get_mut(event) {
                let _ = keys.remove(&key);
                if keys.is_empty() {
                    let _ = self.by_event.remove(event);
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_gauge(&self) {
        gauge!(SUBSCRIPTIONS_ACTIVE).set(self.subscription_count as f64);
    }
}

/// Connections and subscriptions shared by sessions and the dispatcher.
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
    parser: Arc<dyn QueryParser>,
}

impl ConnectionRegistry {
    /// Create a registry that extracts event names with `parser`.
    pub fn new(parser: Arc<dyn QueryParser>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            parser,
        }
    }

    /// Add a connection with no subscriptions. Re-registering an id keeps
    /// its subscriptions and swaps the connection handle.
    pub async fn register(&self, connection: Arc<ClientConnection>) {
        let mut state = self.state.write().await;
        let id = connection.id.clone();
        match state.connections.get_mut(&id) {
            Some(entry) => entry.connection = connection,
            None => {
                let _ = state.connections.insert(
                    id.clone(),
                    ConnectionEntry {
                        connection,
                        subscriptions: HashMap::new(),
                    },
                );
            }
        }
        debug!(conn_id = %id, "connection registered");
    }

    /// Parse `request` and register it as `subscription_id` on the connection.
    ///
    /// An id already active on the connection is replaced.
    pub async fn add_subscription(
        &self,
        connection_id: &ConnectionId,
        subscription_id: impl Into<String>,
        request: StartPayload,
        context: Arc<RequestContext>,
    ) -> Result<Arc<Subscription>, RegistryError> {
        let operations = self.parser.parse(&request.query)?;
        let events = event_names(&operations, request.operation_name.as_deref());

        let subscription = Arc::new(Subscription::new(
            subscription_id.into(),
            connection_id.clone(),
            request,
            events,
            context,
        ));

        let mut state = self.state.write().await;
        let entry = state
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.clone()))?;
        let replaced = entry
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());

        match &replaced {
            Some(old) => state.unindex(old),
            None => state.subscription_count += 1,
        }
        state.index(&subscription);
        state.publish_gauge();

        debug!(
            conn_id = %connection_id,
            sub_id = %subscription.id,
            events = ?subscription.events,
            replaced = replaced.is_some(),
            "subscription added"
        );
        drop(state);
        if let Some(old) = replaced {
            old.retire().await;
        }
        Ok(subscription)
    }

    /// Remove one subscription. Returns `false` if it was not registered.
    ///
    /// The subscription is retired before this returns, so no result for it
    /// is enqueued afterwards.
    pub async fn remove_subscription(
        &self,
        connection_id: &ConnectionId,
        subscription_id: &str,
    ) -> bool {
        let mut state = self.state.write().await;
        let removed = state
            .connections
            .get_mut(connection_id)
            .and_then(|entry| entry.subscriptions.remove(subscription_id));

        let Some(subscription) = removed else {
            return false;
        };
        state.unindex(&subscription);
        state.subscription_count -= 1;
        state.publish_gauge();
        drop(state);
        subscription.retire().await;
        debug!(conn_id = %connection_id, sub_id = subscription_id, "subscription removed");
        true
    }

    /// Remove a connection and all of its subscriptions.
    pub async fn remove_connection(&self, connection_id: &ConnectionId) -> Option<RemovedConnection> {
        let mut state = self.state.write().await;
        let entry = state.connections.remove(connection_id)?;

        let subscriptions: Vec<_> = entry.subscriptions.into_values().collect();
        for sub in &subscriptions {
            state.unindex(sub);
        }
        state.subscription_count -= subscriptions.len();
        state.publish_gauge();

        drop(state);
        for sub in &subscriptions {
            sub.retire().await;
        }

        debug!(
            conn_id = %connection_id,
            subscriptions = subscriptions.len(),
            "connection removed"
        );
        Some(RemovedConnection {
            connection: entry.connection,
            subscriptions,
        })
    }

    /// Snapshot of every subscription listening to `event_name`.
    pub async fn matching_subscriptions(&self, event_name: &str) -> Vec<SubscriptionMatch> {
        let state = self.state.read().await;
        let Some(keys) = state.by_event.get(event_name) else {
            return Vec::new();
        };

        keys.iter()
            .filter_map(|(conn_id, sub_id)| {
                let entry = state.connections.get(conn_id)?;
                let subscription = entry.subscriptions.get(sub_id)?;
                Some(SubscriptionMatch {
                    connection: entry.connection.clone(),
                    subscription: subscription.clone(),
                })
            })
            .collect()
    }

    /// Look up a registered connection.
    pub async fn connection(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let state = self.state.read().await;
        state
            .connections
            .get(connection_id)
            .map(|entry| entry.connection.clone())
    }

    /// Ids of the connection's active subscriptions, sorted.
    pub async fn subscription_ids(&self, connection_id: &ConnectionId) -> Vec<String> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .connections
            .get(connection_id)
            .map(|entry| entry.subscriptions.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of active subscriptions across all connections.
    pub async fn subscription_count(&self) -> usize {
        self.state.read().await.subscription_count
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(AsyncGraphqlParser))
    }
}
