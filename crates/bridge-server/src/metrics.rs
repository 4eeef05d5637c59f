//! Metrics collection and export for the bridge server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const COMMANDS_TOTAL: &str = "pusher_bridge_commands_total";
    pub const COMMAND_ERRORS_TOTAL: &str = "pusher_bridge_command_errors_total";
    pub const STREAM_MESSAGES_TOTAL: &str = "pusher_bridge_stream_messages_total";
    pub const HOST_SESSIONS_ACTIVE: &str = "pusher_bridge_host_sessions_active";
    pub const TRIGGERS_TOTAL: &str = "pusher_bridge_triggers_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Host commands received, by method");
    metrics::describe_counter!(
        names::COMMAND_ERRORS_TOTAL,
        "Host commands that failed, by method"
    );
    metrics::describe_counter!(
        names::STREAM_MESSAGES_TOTAL,
        "Stream messages pushed to the host"
    );
    metrics::describe_gauge!(
        names::HOST_SESSIONS_ACTIVE,
        "Current number of connected host sessions"
    );
    metrics::describe_counter!(names::TRIGGERS_TOTAL, "Events injected through /trigger");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a host command.
pub fn record_command(method: &str) {
    counter!(names::COMMANDS_TOTAL, "method" => method.to_string()).increment(1);
}

/// Record a failed host command.
pub fn record_command_error(method: &str) {
    counter!(names::COMMAND_ERRORS_TOTAL, "method" => method.to_string()).increment(1);
}

/// Record a stream message pushed to the host.
pub fn record_stream_message() {
    counter!(names::STREAM_MESSAGES_TOTAL).increment(1);
}

/// Record an injected event.
pub fn record_trigger() {
    counter!(names::TRIGGERS_TOTAL).increment(1);
}

/// Metrics guard that tracks one host session.
pub struct HostSessionGuard;

impl HostSessionGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::HOST_SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for HostSessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostSessionGuard {
    fn drop(&mut self) {
        gauge!(names::HOST_SESSIONS_ACTIVE).decrement(1.0);
    }
}
