//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a global recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because `max_connections` was reached (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Active subscriptions (gauge).
pub const SUBSCRIPTIONS_ACTIVE: &str = "subscriptions_active";
/// Events accepted by the publisher (counter).
pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
/// Events drained by the dispatcher (counter).
pub const EVENTS_DISPATCHED_TOTAL: &str = "events_dispatched_total";
/// `data` / `error` messages enqueued for clients (counter, labels: type).
pub const DELIVERIES_TOTAL: &str = "deliveries_total";
/// Deliveries that dropped a connection (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "delivery_failures_total";
/// Time spent in the executor per match (histogram).
pub const EXECUTION_DURATION_SECONDS: &str = "execution_duration_seconds";
