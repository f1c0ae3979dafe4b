//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): current client connection count
//! - `proxy_sessions_total` (counter): finished sessions by outcome
//! - `proxy_resolver_lookups_total` (counter): cache lookups by result
//! - `proxy_resolver_cache_entries` (gauge): live cache entries
//! - `proxy_relay_bytes_total` (counter): relayed bytes by direction
//!
//! Without an installed recorder every call is a no-op, so tests and
//! embedders pay nothing.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened(active: u64) {
    counter!("proxy_connections_total").increment(1);
    gauge!("proxy_active_connections").set(active as f64);
}

pub fn record_connection_closed(active: u64) {
    gauge!("proxy_active_connections").set(active as f64);
}

pub fn record_session(outcome: &'static str) {
    counter!("proxy_sessions_total", "outcome" => outcome).increment(1);
}

pub fn record_lookup(result: &'static str) {
    counter!("proxy_resolver_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("proxy_resolver_cache_entries").set(entries as f64);
}

pub fn record_relay_bytes(direction: &'static str, bytes: u64) {
    counter!("proxy_relay_bytes_total", "direction" => direction).increment(bytes);
}
