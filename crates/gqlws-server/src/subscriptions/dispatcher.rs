//! Event dispatcher: drains the event queue, re-executes matching
//! subscriptions, and writes results back to their connections.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use gqlws_core::{Event, GraphQlError, ServerMessage};
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::graphql::{ExecutionContext, ExecutionRequest, Executor};
use crate::metrics::{
    DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, EVENTS_DISPATCHED_TOTAL, EXECUTION_DURATION_SECONDS,
};

use super::publisher::EventPublisher;
use super::registry::{ConnectionRegistry, SubscriptionMatch};

/// Dispatcher tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Event queue capacity.
    pub queue_capacity: usize,
    /// Matches of one event executed concurrently (at least 1).
    pub concurrency: usize,
    /// How long a delivery may wait on a full outbound queue.
    pub delivery_timeout: Duration,
}

impl DispatcherConfig {
    /// Extract dispatcher settings from the server config.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            queue_capacity: config.event_queue_capacity,
            concurrency: config.dispatch_concurrency,
            delivery_timeout: config.delivery_timeout(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_server_config(&ServerConfig::default())
    }
}

/// Single consumer of published events.
pub struct EventDispatcher {
    rx: mpsc::Receiver<Event>,
    registry: Arc<ConnectionRegistry>,
    executor: Arc<dyn Executor>,
    config: DispatcherConfig,
}

impl EventDispatcher {
    /// Create a dispatcher and the publisher feeding it.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        executor: Arc<dyn Executor>,
        config: DispatcherConfig,
    ) -> (Self, EventPublisher) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let dispatcher = Self {
            rx,
            registry,
            executor,
            config,
        };
        (dispatcher, EventPublisher::new(tx))
    }

    /// Run until every publisher is dropped or `shutdown` fires.
    #[instrument(skip_all, name = "event_dispatcher")]
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                event = self.rx.recv() => event,
                () = shutdown.cancelled() => {
                    info!("shutdown requested, dispatcher exiting");
                    break;
                }
            };
            let Some(event) = event else {
                info!("all publishers dropped, dispatcher exiting");
                break;
            };
            let _ = self.dispatch(event).await;
        }
    }

    /// Deliver one event to every matching subscription.
    ///
    /// Returns the number of successful deliveries.
    pub async fn dispatch(&self, event: Event) -> usize {
        counter!(EVENTS_DISPATCHED_TOTAL).increment(1);
        let matches = self.registry.matching_subscriptions(&event.name).await;
        if matches.is_empty() {
            debug!(event = %event.name, "no subscribers");
            return 0;
        }

        let recipients = matches.len();
        let payload = event.payload;
        let delivered = futures::stream::iter(matches)
            .map(|m| self.deliver(m, payload.clone()))
            .buffer_unordered(self.config.concurrency.max(1))
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        debug!(event = %event.name, recipients, delivered, "event dispatched");
        delivered
    }

    async fn deliver(&self, m: SubscriptionMatch, payload: Value) -> bool {
        let SubscriptionMatch {
            connection,
            subscription,
        } = m;
        if connection.is_closed() {
            return false;
        }

        let request = ExecutionRequest {
            query: subscription.query.clone(),
            operation_name: subscription.operation_name.clone(),
            variables: subscription.variables.clone(),
            context: ExecutionContext {
                request: subscription.context.clone(),
                payload,
            },
        };

        let started = Instant::now();
        let result = self.executor.execute(request).await;
        histogram!(EXECUTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let id = subscription.id.clone();
        let message = match result {
            Ok(result) if result.is_ok() => ServerMessage::Data {
                id,
                payload: result,
            },
            Ok(result) => ServerMessage::Error {
                id,
                payload: result.errors,
            },
            Err(e) => ServerMessage::Error {
                id,
                payload: vec![GraphQlError::new(e.to_string())],
            },
        };
        let kind = message.kind().as_str();

        // A stop that raced execution retires the subscription; its
        // `complete` must stay the last frame for this id.
        let outcome = {
            let active = subscription.delivery_gate().await;
            if !*active {
                debug!(
                    conn_id = %connection.id,
                    sub_id = %subscription.id,
                    "subscription stopped during execution, result dropped"
                );
                return false;
            }
            connection
                .deliver(&message, self.config.delivery_timeout)
                .await
        };

        match outcome {
            Ok(()) => {
                counter!(DELIVERIES_TOTAL, "type" => kind).increment(1);
                true
            }
            Err(e) => {
                warn!(
                    conn_id = %connection.id,
                    sub_id = %subscription.id,
                    error = %e,
                    "delivery failed, dropping connection"
                );
                counter!(DELIVERY_FAILURES_TOTAL).increment(1);
                let _ = self.registry.remove_connection(&connection.id).await;
                connection.close();
                false
            }
        }
    }
}
