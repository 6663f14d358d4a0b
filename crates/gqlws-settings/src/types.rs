//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090, "keepAliveIntervalSecs": 15 },
///   "subscriptions": { "dispatchConcurrency": 4 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GqlWsSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Event queue and dispatch tuning.
    pub subscriptions: SubscriptionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl GqlWsSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.subscriptions.event_queue_capacity, "eventQueueCapacity"),
            (self.subscriptions.send_queue_capacity, "sendQueueCapacity"),
            (self.subscriptions.dispatch_concurrency, "dispatchConcurrency"),
            (self.server.max_connections, "maxConnections"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "path must start with '/': {}",
                self.server.path
            )));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Route serving the WebSocket upgrade.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between `ka` messages; `0` disables keep-alive.
    pub keep_alive_interval_secs: u64,
    /// How long shutdown waits for tasks before giving up.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/subscriptions".to_string(),
            max_connections: 1024,
            max_message_size: 1024 * 1024,
            keep_alive_interval_secs: 30,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Event queue and delivery settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionSettings {
    /// Capacity of the publish → dispatcher queue.
    pub event_queue_capacity: usize,
    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,
    /// How long the dispatcher waits on a full outbound queue before
    /// dropping the connection.
    pub delivery_timeout_ms: u64,
    /// Matches of one event executed concurrently.
    pub dispatch_concurrency: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            send_queue_capacity: 256,
            delivery_timeout_ms: 5_000,
            dispatch_concurrency: 1,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
