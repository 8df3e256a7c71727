//! Batch runs and the controller that owns them
//!
//! A `BatchController` admits at most one run at a time. Starting while a run
//! is active cancels that run instead (the start entry point doubles as the
//! cancel toggle). A finished run is kept as the "last run" until `clear`.
//!
//! Starting is split in two so callers can answer before the run finishes:
//! `begin` validates the request and claims the in-progress flag, `execute`
//! drives the scheduler. `start` does both.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use provider::{ProviderKind, ProviderProbe};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::pool::ConcurrencyScheduler;
use crate::progress::{Progress, StatusCounts};
use crate::record::{CredentialRecord, KeyStatus, RecordView};
use crate::runner::{JitterWindow, RetryRunner};
use crate::telemetry;

/// Distinct keys from a newline-delimited blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedInput {
    /// Trimmed, non-empty, first-seen order
    pub keys: Vec<String>,
    pub duplicates: usize,
}

/// Split on newlines, trim, drop empty lines and dedupe.
pub fn parse_input(text: &str) -> ParsedInput {
    let mut seen = HashSet::new();
    let mut parsed = ParsedInput::default();
    for line in text.lines() {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            parsed.keys.push(key.to_string());
        } else {
            parsed.duplicates += 1;
        }
    }
    parsed
}

/// Everything needed to start a run.
#[derive(Clone)]
pub struct BatchRequest {
    /// Newline-delimited key blob
    pub input: String,
    pub model: String,
    /// Provider probe, already wrapped with paid detection where it applies
    pub probe: Arc<dyn ProviderProbe>,
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub jitter: JitterWindow,
}

/// One validation run: its records, limits and counters.
pub struct BatchRun {
    run_id: String,
    provider: ProviderKind,
    records: Vec<CredentialRecord>,
    duplicates: usize,
    completed_count: usize,
    cancel: Arc<AtomicBool>,
    finished: bool,
}

impl BatchRun {
    fn new(keys: Vec<String>, duplicates: usize, request: &BatchRequest) -> Self {
        let provider = request.probe.kind();
        let records = keys
            .into_iter()
            .map(|key| CredentialRecord::new(key, provider, request.model.trim()))
            .collect();
        Self {
            run_id: Uuid::new_v4().to_string(),
            provider,
            records,
            duplicates,
            completed_count: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            finished: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn total_count(&self) -> usize {
        self.records.len()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.records {
            counts.record(record.status());
        }
        counts
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            total: self.total_count(),
            completed: self.completed_count,
            duplicates: self.duplicates,
            cancelled: self.is_cancelled(),
            finished: self.finished,
            counts: self.counts(),
        }
    }
}

/// Totals for a finished (or cancelled) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub completed: usize,
    pub duplicates: usize,
    pub cancelled: bool,
    pub finished: bool,
    pub counts: StatusCounts,
}

/// A run that holds the in-progress flag but has not been driven yet.
///
/// Dropping it without `execute` releases the flag.
pub struct PreparedRun {
    run: BatchRun,
    scheduler: ConcurrencyScheduler,
    guard: ActiveGuard,
}

impl PreparedRun {
    pub fn run_id(&self) -> &str {
        self.run.run_id()
    }

    pub fn total(&self) -> usize {
        self.run.total_count()
    }

    pub fn duplicates(&self) -> usize {
        self.run.duplicates()
    }
}

/// Result of `begin`.
pub enum Admission {
    Started(PreparedRun),
    /// A run was already active; it has been asked to stop.
    Cancelled { run_id: String },
}

/// Result of `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Completed(RunSummary),
    Cancelled { run_id: String },
}

struct ActiveRun {
    run_id: String,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct ControllerState {
    active: Option<ActiveRun>,
    last: Option<BatchRun>,
}

struct Shared {
    state: Mutex<ControllerState>,
    progress: watch::Sender<Progress>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-progress flag for its run when dropped.
struct ActiveGuard {
    shared: Arc<Shared>,
    run_id: String,
}

impl ActiveGuard {
    /// Publish the final snapshot, store `run` as the last run and release
    /// the flag under one lock, so a run admitted afterwards owns the snapshot.
    fn finish(self, run: BatchRun) {
        let cancelled = run.is_cancelled();
        let mut state = self.shared.lock();
        publish_finished(&self.shared.progress, &self.run_id, cancelled);
        state.last = Some(run);
        if state.active.as_ref().is_some_and(|a| a.run_id == self.run_id) {
            state.active = None;
        }
        telemetry::set_run_in_progress(false);
    }
}

/// Mark the snapshot for `run_id` finished. Snapshots of other runs are left
/// untouched; returns whether anything changed.
fn publish_finished(progress: &watch::Sender<Progress>, run_id: &str, cancelled: bool) -> bool {
    progress.send_if_modified(|p| {
        if p.run_id.as_deref() != Some(run_id) {
            return false;
        }
        p.finished = true;
        p.cancelled = cancelled;
        true
    })
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if state.active.as_ref().is_some_and(|a| a.run_id == self.run_id) {
            warn!(run_id = %self.run_id, "batch run dropped before finishing");
            state.active = None;
            telemetry::set_run_in_progress(false);
        }
    }
}

/// Owns run state: the in-progress flag, the active run's cancel handle and
/// the last finished run. Cheap to clone.
#[derive(Clone)]
pub struct BatchController {
    shared: Arc<Shared>,
}

impl Default for BatchController {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchController {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState::default()),
                progress,
            }),
        }
    }

    /// Validate `request` and claim the in-progress flag.
    ///
    /// With a run already active this cancels it and returns
    /// `Admission::Cancelled`, regardless of the request's content.
    pub fn begin(&self, request: BatchRequest) -> Result<Admission> {
        let mut state = self.shared.lock();
        if let Some(active) = &state.active {
            active.cancel.store(true, Ordering::SeqCst);
            info!(run_id = %active.run_id, "start while running, cancelling active run");
            return Ok(Admission::Cancelled {
                run_id: active.run_id.clone(),
            });
        }

        let parsed = parse_input(&request.input);
        if parsed.keys.is_empty() {
            return Err(Error::EmptyBatch);
        }
        if request.model.trim().is_empty() {
            return Err(Error::NoModel);
        }

        let runner = RetryRunner::new(request.probe.clone(), request.max_retries, request.jitter);
        let scheduler = ConcurrencyScheduler::new(runner, request.concurrency_limit)?;

        let run = BatchRun::new(parsed.keys, parsed.duplicates, &request);
        if run.duplicates() > 0 {
            info!(
                run_id = %run.run_id(),
                duplicates = run.duplicates(),
                "duplicate keys removed from input"
            );
        }

        state.active = Some(ActiveRun {
            run_id: run.run_id.clone(),
            cancel: run.cancel.clone(),
        });
        self.shared
            .progress
            .send_replace(Progress::started(run.run_id(), run.total_count()));
        drop(state);

        telemetry::set_run_in_progress(true);

        let guard = ActiveGuard {
            shared: self.shared.clone(),
            run_id: run.run_id.clone(),
        };
        Ok(Admission::Started(PreparedRun {
            run,
            scheduler,
            guard,
        }))
    }

    /// Drive a prepared run to completion (or cancellation).
    pub async fn execute(&self, prepared: PreparedRun) -> RunSummary {
        let PreparedRun {
            mut run,
            scheduler,
            guard,
        } = prepared;

        info!(
            run_id = %run.run_id,
            provider = %run.provider,
            total = run.total_count(),
            concurrency_limit = scheduler.limit(),
            max_retries = scheduler.max_retries(),
            "batch run started"
        );

        let outcome = scheduler
            .run_batch(&mut run.records, &run.cancel, &self.shared.progress)
            .await;
        run.completed_count = outcome.completed;
        run.finished = true;
        let summary = run.summary();

        info!(
            run_id = %summary.run_id,
            completed = summary.completed,
            total = summary.total,
            cancelled = summary.cancelled,
            paid = summary.counts.paid,
            valid = summary.counts.valid,
            rate_limited = summary.counts.rate_limited,
            invalid = summary.counts.invalid,
            "batch run finished"
        );

        guard.finish(run);
        summary
    }

    /// `begin` then `execute`.
    pub async fn start(&self, request: BatchRequest) -> Result<StartOutcome> {
        match self.begin(request)? {
            Admission::Started(prepared) => Ok(StartOutcome::Completed(self.execute(prepared).await)),
            Admission::Cancelled { run_id } => Ok(StartOutcome::Cancelled { run_id }),
        }
    }

    /// Ask the active run to stop. Idempotent; returns whether a run was active.
    pub fn cancel(&self) -> bool {
        let state = self.shared.lock();
        match &state.active {
            Some(active) => {
                if !active.cancel.swap(true, Ordering::SeqCst) {
                    info!(run_id = %active.run_id, "batch run cancellation requested");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.shared.progress.subscribe()
    }

    pub fn current_progress(&self) -> Progress {
        self.shared.progress.borrow().clone()
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        self.shared.lock().last.as_ref().map(BatchRun::summary)
    }

    /// Views of the last run's records in input order, optionally filtered.
    pub fn last_results(&self, status: Option<KeyStatus>, reveal_keys: bool) -> Vec<RecordView> {
        let state = self.shared.lock();
        let Some(run) = &state.last else {
            return Vec::new();
        };
        run.records
            .iter()
            .filter(|r| status.is_none_or(|s| r.status() == s))
            .map(|r| r.view(reveal_keys))
            .collect()
    }

    /// Forget the last run. Fails while a run is active.
    pub fn clear(&self) -> Result<bool> {
        let mut state = self.shared.lock();
        if state.active.is_some() {
            return Err(Error::RunInProgress);
        }
        let cleared = state.last.take().is_some();
        if cleared {
            self.shared.progress.send_replace(Progress::default());
            info!("last run results cleared");
        }
        Ok(cleared)
    }
}
