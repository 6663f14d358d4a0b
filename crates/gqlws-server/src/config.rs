//! Server configuration.

use std::time::Duration;

use gqlws_settings::GqlWsSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the subscription server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route serving the WebSocket upgrade.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// `ka` interval in seconds; `0` disables keep-alive.
    pub keep_alive_interval_secs: u64,
    /// How long shutdown waits for tracked tasks.
    pub shutdown_timeout_secs: u64,
    /// Capacity of the publish → dispatcher queue.
    pub event_queue_capacity: usize,
    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,
    /// How long a delivery may wait on a full outbound queue.
    pub delivery_timeout_ms: u64,
    /// Matches of one event executed concurrently.
    pub dispatch_concurrency: usize,
}

impl ServerConfig {
    /// Build a config from loaded settings.
    pub fn from_settings(settings: &GqlWsSettings) -> Self {
        let server = &settings.server;
        let subs = &settings.subscriptions;
        Self {
            host: server.host.clone(),
            port: server.port,
            path: server.path.clone(),
            max_connections: server.max_connections,
            max_message_size: server.max_message_size,
            keep_alive_interval_secs: server.keep_alive_interval_secs,
            shutdown_timeout_secs: server.shutdown_timeout_secs,
            event_queue_capacity: subs.event_queue_capacity,
            send_queue_capacity: subs.send_queue_capacity,
            delivery_timeout_ms: subs.delivery_timeout_ms,
            dispatch_concurrency: subs.dispatch_concurrency,
        }
    }

    /// Keep-alive interval, `None` when disabled.
    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_secs > 0).then(|| Duration::from_secs(self.keep_alive_interval_secs))
    }

    /// Delivery timeout as a `Duration`.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut config = Self::from_settings(&GqlWsSettings::default());
        config.port = 0;
        config
    }
}
