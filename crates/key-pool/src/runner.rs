//! Bounded retries around a single provider probe
//!
//! The runner owns one record for the duration of its validation. Attempts are
//! strictly sequential; between attempts it sleeps a random delay from a fixed
//! window so that many keys failing at once do not retry in lockstep. The
//! window does not grow with the attempt number.

use std::sync::Arc;
use std::time::{Duration, Instant};

use provider::{Outcome, ProviderProbe};
use rand::RngExt;
use tracing::{debug, warn};

use crate::decider::is_retryable;
use crate::record::CredentialRecord;
use crate::telemetry;

/// Random delay window applied before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterWindow {
    pub min: Duration,
    pub max: Duration,
}

impl JitterWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Uniform sample from `[min, max]`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }
}

impl Default for JitterWindow {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(800))
    }
}

/// Runs one probe with up to `max_retries` retries and writes the result
/// into the record.
pub struct RetryRunner {
    probe: Arc<dyn ProviderProbe>,
    max_retries: u32,
    jitter: JitterWindow,
}

impl RetryRunner {
    pub fn new(probe: Arc<dyn ProviderProbe>, max_retries: u32, jitter: JitterWindow) -> Self {
        Self {
            probe,
            max_retries,
            jitter,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Validate `record`, returning the outcome it was finalized with.
    ///
    /// Success and rate limiting end the loop immediately. Other failures are
    /// retried while the decider calls them transient and budget remains. A
    /// probe that errors out counts as a transient failure.
    pub async fn run(&self, record: &mut CredentialRecord) -> Outcome {
        let provider = self.probe.kind();
        let mut attempt = 0u32;

        loop {
            if let Err(e) = record.begin_attempt(attempt) {
                warn!(key = %record.preview(), error = %e, "record not runnable");
                return Outcome::failure(e.to_string());
            }

            if attempt > 0 {
                let delay = self.jitter.sample();
                debug!(
                    key = %record.preview(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after jitter"
                );
                telemetry::record_retry(provider.id());
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let (outcome, errored) = match self.probe.probe(record.key(), record.model()).await {
                Ok(outcome) => (outcome, false),
                Err(e) => {
                    warn!(key = %record.preview(), attempt, error = %e, "probe raised an error");
                    (Outcome::failure(format!("Exception: {e}")), true)
                }
            };
            telemetry::record_probe(provider.id(), &outcome, started.elapsed());

            let last_attempt = attempt >= self.max_retries;
            let transient = errored
                || is_retryable(outcome.error_detail.as_deref().unwrap_or_default());

            if outcome.is_definitive() || last_attempt || !transient {
                match record.finalize(&outcome) {
                    Ok(status) => debug!(
                        key = %record.preview(),
                        attempt,
                        status = status.label(),
                        "key finalized"
                    ),
                    Err(e) => warn!(key = %record.preview(), error = %e, "failed to finalize key"),
                }
                return outcome;
            }

            debug!(
                key = %record.preview(),
                attempt,
                error = outcome.error_detail.as_deref().unwrap_or_default(),
                "transient failure, will retry"
            );
            attempt += 1;
        }
    }
}
