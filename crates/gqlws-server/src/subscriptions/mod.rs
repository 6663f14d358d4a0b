//! The subscription engine: registry, event queue and dispatcher.

pub mod dispatcher;
pub mod publisher;
pub mod registry;
pub mod subscription;

pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use publisher::{EventPublisher, PublishError};
pub use registry::{ConnectionRegistry, RegistryError, RemovedConnection, SubscriptionMatch};
pub use subscription::Subscription;
