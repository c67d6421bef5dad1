//! Metrics collection and export for evsock.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::Context;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "evsock_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "evsock_connections_active";
    pub const MESSAGES_TOTAL: &str = "evsock_messages_total";
    pub const CHANNELS_ACTIVE: &str = "evsock_channels_active";
    pub const AUTH_TOTAL: &str = "evsock_auth_total";
    pub const ERRORS_TOTAL: &str = "evsock_errors_total";
}

enum Kind {
    Counter,
    Gauge,
}

const DESCRIPTIONS: [(&str, Kind, &str); 6] = [
    (names::CONNECTIONS_TOTAL, Kind::Counter, "Connections accepted since start"),
    (names::CONNECTIONS_ACTIVE, Kind::Gauge, "Currently open connections"),
    (names::MESSAGES_TOTAL, Kind::Counter, "Payloads run through the pipeline"),
    (names::CHANNELS_ACTIVE, Kind::Gauge, "Non-empty channels"),
    (names::AUTH_TOTAL, Kind::Counter, "Authentication attempts by outcome"),
    (names::ERRORS_TOTAL, Kind::Counter, "Errors by source"),
];

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    for (name, kind, description) in DESCRIPTIONS {
        match kind {
            Kind::Counter => metrics::describe_counter!(name, description),
            Kind::Gauge => metrics::describe_gauge!(name, description),
        }
    }

    info!(metrics = DESCRIPTIONS.len(), "Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(%addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a payload passing through the pipeline.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind).increment(1);
}

/// Record an authentication outcome.
pub fn record_auth(outcome: &'static str) {
    counter!(names::AUTH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error from `error_type` (`server`, `connection`, `middleware`).
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
