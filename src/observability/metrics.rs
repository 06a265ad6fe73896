//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the server's request, response and connection metrics
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `werval_requests_received_total` (counter): decoded request headers by method
//! - `werval_responses_sent_total` (counter): written responses by status
//! - `werval_response_duration_seconds` (histogram): header received to response written
//! - `werval_requests_rejected_total` (counter): synthesized rejections by reason
//! - `werval_body_spooled_total` (counter): request bodies spilled to disk
//! - `werval_active_connections` (gauge): currently open connections
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - Labels are bounded: method, status code, rejection reason

use std::net::SocketAddr;
use std::time::Instant;

use http::{Method, StatusCode};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Why a request never reached the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EntityTooLarge,
    BadRequest,
    ShuttingDown,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::EntityTooLarge => "entity_too_large",
            Rejection::BadRequest => "bad_request",
            Rejection::ShuttingDown => "shutting_down",
        }
    }
}

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request_received(method: &Method) {
    ::metrics::counter!("werval_requests_received_total", "method" => method.to_string())
        .increment(1);
}

pub fn record_response_sent(status: StatusCode, started: Instant) {
    ::metrics::counter!(
        "werval_responses_sent_total",
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    ::metrics::histogram!("werval_response_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

pub fn record_rejected(reason: Rejection) {
    ::metrics::counter!("werval_requests_rejected_total", "reason" => reason.as_str())
        .increment(1);
}

pub fn record_body_spooled() {
    ::metrics::counter!("werval_body_spooled_total").increment(1);
}

pub fn connection_opened() {
    ::metrics::gauge!("werval_active_connections").increment(1.0);
}

pub fn connection_closed() {
    ::metrics::gauge!("werval_active_connections").decrement(1.0);
}
