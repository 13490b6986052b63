//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, cache hits, upstream failures)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): by method and status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_cache_hits_total` / `proxy_cache_misses_total` (counters)
//! - `proxy_cache_entries` (gauge): current cache entry count
//! - `proxy_upstream_errors_total` (counter): by error kind
//! - `proxy_http2_fallbacks_total` (counter): silent HTTP/1.1 resends

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter started"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_cache_hit() {
    counter!("proxy_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("proxy_cache_misses_total").increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("proxy_cache_entries").set(entries as f64);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_http2_fallback() {
    counter!("proxy_http2_fallbacks_total").increment(1);
}

pub fn record_ws_bridge() {
    counter!("proxy_ws_bridges_total").increment(1);
}
