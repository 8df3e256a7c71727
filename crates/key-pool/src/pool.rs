//! Fixed-size slot pool driving per-key validation
//!
//! The scheduler keeps `min(limit, remaining)` runner futures in flight. Slots
//! are filled from the front; when a runner finishes, its slot is refilled with
//! the next unscheduled record, or cleared once the queue is empty. Every
//! occupancy carries a fresh ticket and a completion only counts if its ticket
//! matches the one its slot currently holds.
//!
//! Cancellation is cooperative: the flag is checked before each refill. Once it
//! is observed no new record is scheduled, in-flight runners finish normally
//! (their results are kept) and unscheduled records stay `Pending`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::record::{CredentialRecord, KeyStatus};
use crate::runner::RetryRunner;
use crate::telemetry;

/// One occupancy of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    index: usize,
    ticket: u64,
}

/// A runner future's result, tagged with the occupancy it ran in.
struct Finished {
    slot: Slot,
    position: usize,
    status: KeyStatus,
}

/// What a `run_batch` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    /// Records that went through a runner
    pub completed: usize,
    /// Records left `Pending` because the run was cancelled first
    pub unscheduled: usize,
    pub cancelled: bool,
    /// Highest number of runners in flight at once
    pub peak_in_flight: usize,
}

pub struct ConcurrencyScheduler {
    runner: RetryRunner,
    limit: usize,
}

impl ConcurrencyScheduler {
    /// Fails with `InvalidSettings` for a zero limit.
    pub fn new(runner: RetryRunner, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(Error::InvalidSettings(
                "concurrency_limit must be at least 1".into(),
            ));
        }
        Ok(Self { runner, limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn max_retries(&self) -> u32 {
        self.runner.max_retries()
    }

    /// Validate every record, at most `limit` at a time.
    ///
    /// `progress` receives one update per completed record; the caller owns
    /// the final "finished" update.
    pub async fn run_batch(
        &self,
        records: &mut [CredentialRecord],
        cancel: &AtomicBool,
        progress: &watch::Sender<Progress>,
    ) -> ScheduleSummary {
        let total = records.len();
        let mut queue = records.iter_mut().enumerate();
        let mut slots: Vec<Option<Slot>> = vec![None; self.limit];
        let mut in_flight = FuturesUnordered::new();
        let mut next_ticket = 0u64;
        let mut summary = ScheduleSummary::default();

        for index in 0..self.limit {
            if cancel.load(Ordering::SeqCst) {
                summary.cancelled = true;
                break;
            }
            let Some((position, record)) = queue.next() else {
                break;
            };
            let slot = Slot {
                index,
                ticket: next_ticket,
            };
            next_ticket += 1;
            slots[index] = Some(slot);
            in_flight.push(occupy(&self.runner, slot, position, record));
        }
        summary.peak_in_flight = in_flight.len();
        debug!(limit = self.limit, total, started = in_flight.len(), "slots filled");

        while let Some(done) = in_flight.next().await {
            // Each occupancy future completes once and tickets never repeat.
            debug_assert_eq!(slots[done.slot.index], Some(done.slot));

            summary.completed += 1;
            telemetry::record_result(done.status);
            progress.send_modify(|p| {
                p.completed += 1;
                p.counts.record(done.status);
            });
            debug!(
                slot = done.slot.index,
                position = done.position,
                status = done.status.label(),
                completed = summary.completed,
                total,
                "key completed"
            );

            if cancel.load(Ordering::SeqCst) {
                if !summary.cancelled {
                    info!(
                        in_flight = in_flight.len(),
                        "cancellation observed, draining in-flight keys"
                    );
                }
                summary.cancelled = true;
                slots[done.slot.index] = None;
                continue;
            }

            match queue.next() {
                Some((position, record)) => {
                    let slot = Slot {
                        index: done.slot.index,
                        ticket: next_ticket,
                    };
                    next_ticket += 1;
                    slots[slot.index] = Some(slot);
                    in_flight.push(occupy(&self.runner, slot, position, record));
                    summary.peak_in_flight = summary.peak_in_flight.max(in_flight.len());
                }
                None => slots[done.slot.index] = None,
            }
        }

        summary.unscheduled = total - summary.completed;
        summary
    }
}

fn occupy<'a>(
    runner: &'a RetryRunner,
    slot: Slot,
    position: usize,
    record: &'a mut CredentialRecord,
) -> impl Future<Output = Finished> + 'a {
    async move {
        runner.run(record).await;
        Finished {
            slot,
            position,
            status: record.status(),
        }
    }
}
