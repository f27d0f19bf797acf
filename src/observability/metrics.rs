//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_beacons_total` (counter): beacons by outcome
//!   (`sent`, `failed`, `rejected`, `skipped`, `vetoed`)
//! - `relay_requests_total` (counter): relayed requests by method, status
//! - `relay_request_duration_seconds` (histogram): upstream latency

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Count one beacon outcome.
pub fn record_beacon(outcome: &'static str) {
    metrics::counter!("relay_beacons_total", "outcome" => outcome).increment(1);
}

/// Record a relayed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    metrics::counter!("relay_requests_total", "method" => method.clone(), "status" => status.clone())
        .increment(1);
    metrics::histogram!("relay_request_duration_seconds", "method" => method, "status" => status)
        .record(start.elapsed().as_secs_f64());
}
