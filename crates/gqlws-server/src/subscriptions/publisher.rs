//! Producer half of the event queue.

use gqlws_core::Event;
use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

use crate::metrics::EVENTS_PUBLISHED_TOTAL;

/// Publishing an event failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The dispatcher has stopped.
    #[error("event dispatcher stopped")]
    Closed,
    /// The queue is full (`try_publish` only).
    #[error("event queue full")]
    Full,
}

/// Cloneable handle for publishing named events to subscribers.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    tx: mpsc::Sender<Event>,
}

impl EventPublisher {
    pub(crate) fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Publish an event, waiting for queue space.
    pub async fn publish(
        &self,
        name: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Result<(), PublishError> {
        self.publish_event(Event::new(name, payload)).await
    }

    /// Publish a prepared [`Event`], waiting for queue space.
    pub async fn publish_event(&self, event: Event) -> Result<(), PublishError> {
        trace!(event = %event.name, "publishing event");
        self.tx.send(event).await.map_err(|_| PublishError::Closed)?;
        counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
        Ok(())
    }

    /// Publish without waiting. Fails with [`PublishError::Full`] when the
    /// queue has no room.
    pub fn try_publish(
        &self,
        name: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Result<(), PublishError> {
        self.tx
            .try_send(Event::new(name, payload))
            .map_err(|e| match e {
                TrySendError::Full(_) => PublishError::Full,
                TrySendError::Closed(_) => PublishError::Closed,
            })?;
        counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
        Ok(())
    }

    /// Whether the dispatcher side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
