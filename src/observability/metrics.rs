//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_rate_limited_total` (counter): denied admissions by limiter scope
//! - `guard_csrf_rejected_total` (counter): failed token validations by reason
//! - `guard_sessions_terminated_total` (counter): terminations by reason
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels carry reasons and scopes only, never identifiers

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rate_limited(scope: &str) {
    counter!("guard_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_csrf_rejected(reason: &'static str) {
    counter!("guard_csrf_rejected_total", "reason" => reason).increment(1);
}

pub fn record_session_terminated(reason: &'static str) {
    counter!("guard_sessions_terminated_total", "reason" => reason).increment(1);
}
