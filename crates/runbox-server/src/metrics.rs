//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across crates.

/// `WebSocket` connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active `WebSocket` connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// `WebSocket` disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Sessions closed for a protocol violation (counter, labels: reason).
pub const WS_PROTOCOL_VIOLATIONS_TOTAL: &str = "ws_protocol_violations_total";
/// Keepalive pings queued (counter).
pub const WS_PINGS_SENT_TOTAL: &str = "ws_pings_sent_total";
/// Outbound frames dropped (counter).
pub const WS_DROPPED_MESSAGES_TOTAL: &str = "ws_dropped_messages_total";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// `run` commands executed (counter, labels: outcome).
pub const RUN_COMMANDS_TOTAL: &str = "run_commands_total";
/// `run` command latency (histogram).
pub const RUN_DURATION_SECONDS: &str = "run_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_local_recorder() {
        // No global install, so tests don't fight over the recorder.
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(WS_CONNECTIONS_TOTAL).increment(3);
        });
        let output = render(&handle);
        assert!(output.contains("ws_connections_total 3"));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            WS_PROTOCOL_VIOLATIONS_TOTAL,
            WS_PINGS_SENT_TOTAL,
            WS_DROPPED_MESSAGES_TOTAL,
            WS_REJECTED_TOTAL,
            RUN_COMMANDS_TOTAL,
            RUN_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
