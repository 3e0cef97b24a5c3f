//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_submissions_total` (counter): client messages by kind
//! - `bridge_outcomes_total` (counter): request outcomes by kind
//!   (response, error, failed, timeout)
//! - `bridge_unroutable_total` (counter): backend replies with no pending entry
//! - `bridge_framing_errors_total` (counter): malformed backend lines
//! - `bridge_notifications_dropped_total` (counter): lossy queue evictions
//! - `bridge_backend_restarts_total` / `bridge_backend_crashes_total` (counters)
//! - `bridge_backend_state` (gauge): numeric [`ProcessState`]
//! - `bridge_sessions` / `bridge_pending_requests` (gauges)

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::backend::ProcessState;

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_submission(kind: &'static str) {
    metrics::counter!("bridge_submissions_total", "kind" => kind).increment(1);
}

pub fn record_outcome(kind: &'static str) {
    metrics::counter!("bridge_outcomes_total", "kind" => kind).increment(1);
}

pub fn record_unroutable() {
    metrics::counter!("bridge_unroutable_total").increment(1);
}

pub fn record_framing_error() {
    metrics::counter!("bridge_framing_errors_total").increment(1);
}

pub fn record_notification_dropped() {
    metrics::counter!("bridge_notifications_dropped_total").increment(1);
}

pub fn record_backend_restart() {
    metrics::counter!("bridge_backend_restarts_total").increment(1);
}

pub fn record_backend_crash(reason: &'static str) {
    metrics::counter!("bridge_backend_crashes_total", "reason" => reason).increment(1);
}

pub fn set_backend_state(state: ProcessState) {
    metrics::gauge!("bridge_backend_state").set(state as u8 as f64);
}

pub fn set_sessions(count: usize) {
    metrics::gauge!("bridge_sessions").set(count as f64);
}

pub fn set_pending(count: usize) {
    metrics::gauge!("bridge_pending_requests").set(count as f64);
}
