//! Metrics collection and exposition.
//!
//! # Metrics
//! - `varnishconf_reloads_total` (counter): finished reload cycles by outcome
//! - `varnishconf_reload_duration_seconds` (histogram): cycle latency
//! - `varnishconf_admin_commands_total` (counter): admin responses by status
//! - `varnishconf_admin_connect_failures_total` (counter): failed connection attempts
//! - `varnishconf_admin_connected` (gauge): 1 while authenticated
//! - `varnishconf_vcl_discard_failures_total` (counter): superseded VCLs left behind
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_reload(success: bool, duration: Duration) {
    let outcome = if success { "success" } else { "failure" };
    counter!("varnishconf_reloads_total", "outcome" => outcome).increment(1);
    histogram!("varnishconf_reload_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_admin_command(status: u16) {
    counter!("varnishconf_admin_commands_total", "status" => status.to_string()).increment(1);
}

pub fn record_admin_connect_failure() {
    counter!("varnishconf_admin_connect_failures_total").increment(1);
}

pub fn set_admin_connected(connected: bool) {
    gauge!("varnishconf_admin_connected").set(if connected { 1.0 } else { 0.0 });
}

pub fn record_vcl_discard_failure() {
    counter!("varnishconf_vcl_discard_failures_total").increment(1);
}
