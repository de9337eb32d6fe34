//! Prometheus metrics for the relay.
//!
//! Thin wrappers over the `metrics` facade so handlers record with one call.
//! The recorder is installed once per process; [`install`] is idempotent.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder (first call) and return its handle.
///
/// If another recorder already owns the global slot, a detached recorder is
/// returned so `/metrics` still renders (empty) instead of failing.
pub fn install() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

pub fn record_request(endpoint: &'static str, status: u16) {
    counter!("relay_requests_total", "endpoint" => endpoint, "status" => status.to_string())
        .increment(1);
}

pub fn record_duration(endpoint: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());
}

/// Transport-level failure talking to the origin
pub fn record_origin_error() {
    counter!("relay_origin_errors_total").increment(1);
}

/// Request cancelled before completion (`timeout` or `client_disconnect`)
pub fn record_aborted(reason: &'static str) {
    counter!("relay_aborted_total", "reason" => reason).increment(1);
}

pub fn record_rewrite_fallback() {
    counter!("relay_rewrite_fallbacks_total").increment(1);
}

pub fn record_manifest_rewritten() {
    counter!("relay_manifests_rewritten_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent_and_renders() {
        let _first = install();
        record_rewrite_fallback();

        let rendered = install().render();
        assert!(rendered.contains("relay_rewrite_fallbacks_total"));
    }
}
