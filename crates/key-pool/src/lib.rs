//! Bulk API key validation engine
//!
//! Validates a batch of distinct keys against one provider under a fixed
//! concurrency budget. Each key runs through a bounded retry loop and lands in
//! exactly one terminal status.
//!
//! Key lifecycle:
//! 1. Input is parsed, trimmed and deduplicated → one `Pending` record per key
//! 2. The scheduler hands the record to a free slot → `Testing`
//! 3. A transient failure (network, 403, 502-504) → `Retrying` after a random jitter
//! 4. Success → `Valid`, or `Paid` when the paid tier probe confirms it
//! 5. Rate limiting → `RateLimited` immediately; other failures → `Invalid`
//!
//! Paid tier probes go through their own bounded FIFO queue so they never eat
//! into the main slot budget.

pub mod batch;
pub mod decider;
pub mod error;
pub mod paid;
pub mod pool;
pub mod progress;
pub mod record;
pub mod runner;
pub mod telemetry;

pub use batch::{
    Admission, BatchController, BatchRequest, BatchRun, ParsedInput, PreparedRun, RunSummary,
    StartOutcome, parse_input,
};
pub use decider::{extract_status_code, is_retryable, should_retry};
pub use error::{Error, Result};
pub use paid::{BackoffPolicy, PaidDetectionQueue, PaidTierHook};
pub use pool::{ConcurrencyScheduler, ScheduleSummary};
pub use progress::{Progress, StatusCounts};
pub use record::{CredentialRecord, KeyStatus, RecordView};
pub use runner::{JitterWindow, RetryRunner};
