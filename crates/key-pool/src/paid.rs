//! Paid tier detection queue
//!
//! The tier probe has its own concurrency budget, independent of the main
//! slot pool: at most `concurrency` tier probes run at once and excess callers
//! wait in arrival order (the semaphore is fair). A rate-limited verdict is
//! retried with exponential backoff; once retries run out the rate-limited
//! verdict is returned as is. Nothing on this path can fail a key that already
//! validated.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use provider::{Outcome, PaidTierProbe, ProbeFuture, ProviderKind, ProviderProbe, TierVerdict};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::telemetry;

/// Exponential backoff for rate-limited tier probes.
///
/// `delay(attempt) = min(max, base * factor^attempt)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let ms = (base_ms * self.factor.powi(attempt as i32)).min(max_ms);
        Duration::from_millis(ms as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            factor: 2.0,
            max: Duration::from_millis(16_000),
            max_retries: 3,
        }
    }
}

/// Decrements the wrapped counter when dropped.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded FIFO gate in front of the paid tier probe.
pub struct PaidDetectionQueue {
    probe: Arc<dyn PaidTierProbe>,
    permits: Semaphore,
    backoff: BackoffPolicy,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
}

impl PaidDetectionQueue {
    pub fn new(probe: Arc<dyn PaidTierProbe>, concurrency: usize, backoff: BackoffPolicy) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            probe,
            permits: Semaphore::new(concurrency),
            backoff,
            in_flight: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Tier probes currently holding a permit (including backoff waits).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Callers queued for a permit.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn publish_depth(&self) {
        telemetry::set_paid_queue_depth(self.in_flight(), self.waiting());
    }

    /// Run the tier probe for `key` once a permit is available.
    pub async fn detect(&self, key: &str) -> TierVerdict {
        let permit = {
            let _queued = CountGuard::enter(&self.waiting);
            self.publish_depth();
            self.permits.acquire().await
        };
        let _permit = match permit {
            Ok(p) => p,
            Err(e) => {
                self.publish_depth();
                warn!(error = %e, "paid detection queue closed");
                return TierVerdict::free("queue_closed");
            }
        };
        let running = CountGuard::enter(&self.in_flight);
        self.publish_depth();

        let verdict = self.probe_with_backoff(key).await;
        drop(running);
        self.publish_depth();
        verdict
    }

    /// Tier probe with exponential backoff on rate-limited verdicts.
    async fn probe_with_backoff(&self, key: &str) -> TierVerdict {
        let mut attempt = 0u32;
        loop {
            let verdict = self.probe.probe_tier(key).await;
            telemetry::record_paid_probe(&verdict.reason);

            if !verdict.is_rate_limited() || attempt >= self.backoff.max_retries {
                return verdict;
            }

            let delay = self.backoff.delay_for(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "tier probe rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Probe decorator that adds the paid tier hint to successful probes.
///
/// Only providers that support paid detection are routed through the queue;
/// everything else passes straight through.
pub struct PaidTierHook {
    inner: Arc<dyn ProviderProbe>,
    queue: Arc<PaidDetectionQueue>,
}

impl PaidTierHook {
    pub fn new(inner: Arc<dyn ProviderProbe>, queue: Arc<PaidDetectionQueue>) -> Self {
        Self { inner, queue }
    }
}

impl ProviderProbe for PaidTierHook {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn probe<'a>(
        &'a self,
        key: &'a str,
        model: &'a str,
    ) -> ProbeFuture<'a, provider::Result<Outcome>> {
        Box::pin(async move {
            let outcome = self.inner.probe(key, model).await?;
            if !outcome.success || !self.inner.kind().supports_paid_detection() {
                return Ok(outcome);
            }

            let verdict = self.queue.detect(key).await;
            info!(
                key = %common::mask_key(key),
                is_paid = verdict.is_paid,
                reason = %verdict.reason,
                "paid tier detection finished"
            );
            Ok(outcome.with_paid_hint(verdict.is_paid))
        })
    }
}
