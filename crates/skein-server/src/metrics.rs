//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Connections opened (counter, labels: transport).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Frames decoded (counter, labels: kind).
pub const FRAMES_RECEIVED_TOTAL: &str = "frames_received_total";
/// Data frames handed to the router (counter).
pub const FRAMES_DISPATCHED_TOTAL: &str = "frames_dispatched_total";
/// Dispatches that ended in an error (counter, labels: kind).
pub const DISPATCH_ERRORS_TOTAL: &str = "dispatch_errors_total";
/// Malformed frames (counter).
pub const FRAMING_ERRORS_TOTAL: &str = "framing_errors_total";
/// Pushes that failed (counter, labels: reason).
pub const PUSH_FAILURES_TOTAL: &str = "push_failures_total";
