//! Metrics emitted by the validation engine
//!
//! Recorded through the `metrics` facade; the service binary installs the
//! Prometheus exporter. Without a recorder these calls are no-ops.
//!
//! - `keycheck_probes_total` (counter): labels `provider`, `outcome`
//! - `keycheck_probe_duration_seconds` (histogram): label `provider`
//! - `keycheck_retries_total` (counter): label `provider`
//! - `keycheck_results_total` (counter): label `status`
//! - `keycheck_paid_probes_total` (counter): label `reason`
//! - `keycheck_run_in_progress` (gauge)
//! - `keycheck_paid_in_flight`, `keycheck_paid_waiting` (gauges): paid tier
//!   queue depth

use std::time::Duration;

use provider::Outcome;

use crate::record::KeyStatus;

pub const PROBE_DURATION_METRIC: &str = "keycheck_probe_duration_seconds";

fn outcome_label(outcome: &Outcome) -> &'static str {
    if outcome.success {
        "success"
    } else if outcome.rate_limited {
        "rate_limited"
    } else {
        "failure"
    }
}

pub fn record_probe(provider: &'static str, outcome: &Outcome, elapsed: Duration) {
    metrics::counter!("keycheck_probes_total", "provider" => provider, "outcome" => outcome_label(outcome))
        .increment(1);
    metrics::histogram!(PROBE_DURATION_METRIC, "provider" => provider)
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(provider: &'static str) {
    metrics::counter!("keycheck_retries_total", "provider" => provider).increment(1);
}

pub fn record_result(status: KeyStatus) {
    metrics::counter!("keycheck_results_total", "status" => status.label()).increment(1);
}

pub fn record_paid_probe(reason: &str) {
    let reason = if reason.starts_with("network:") {
        "network".to_string()
    } else {
        reason.to_string()
    };
    metrics::counter!("keycheck_paid_probes_total", "reason" => reason).increment(1);
}

pub fn set_run_in_progress(running: bool) {
    metrics::gauge!("keycheck_run_in_progress").set(if running { 1.0 } else { 0.0 });
}

pub fn set_paid_queue_depth(in_flight: usize, waiting: usize) {
    metrics::gauge!("keycheck_paid_in_flight").set(in_flight as f64);
    metrics::gauge!("keycheck_paid_waiting").set(waiting as f64);
}
