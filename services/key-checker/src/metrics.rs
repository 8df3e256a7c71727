//! Prometheus metrics exposition
//!
//! The engine records through the `metrics` facade (see `key_pool::telemetry`);
//! this module installs the exporter that renders them on `/metrics`.

use key_pool::telemetry::PROBE_DURATION_METRIC;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Probe latency buckets, 50ms up to past the longest request timeout.
const PROBE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(PROBE_DURATION_METRIC.to_string()), PROBE_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The probe duration histogram gets explicit buckets so it renders `_bucket`
/// lines instead of a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Handle backed by a recorder that is never installed globally.
#[cfg(test)]
pub fn build_handle() -> PrometheusHandle {
    builder().build_recorder().handle()
}
