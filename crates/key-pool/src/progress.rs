//! Run progress snapshots
//!
//! Published on a `watch` channel: after every completed key and once more
//! when the run finishes. `completed` never decreases within a run.

use serde::Serialize;

use crate::record::KeyStatus;

/// Per-terminal-status tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub paid: usize,
    pub valid: usize,
    pub rate_limited: usize,
    pub invalid: usize,
}

impl StatusCounts {
    /// Count one finished key. Non-terminal statuses are ignored.
    pub fn record(&mut self, status: KeyStatus) {
        match status {
            KeyStatus::Paid => self.paid += 1,
            KeyStatus::Valid => self.valid += 1,
            KeyStatus::RateLimited => self.rate_limited += 1,
            KeyStatus::Invalid => self.invalid += 1,
            KeyStatus::Pending | KeyStatus::Testing | KeyStatus::Retrying => {}
        }
    }

    pub fn get(&self, status: KeyStatus) -> usize {
        match status {
            KeyStatus::Paid => self.paid,
            KeyStatus::Valid => self.valid,
            KeyStatus::RateLimited => self.rate_limited,
            KeyStatus::Invalid => self.invalid,
            KeyStatus::Pending | KeyStatus::Testing | KeyStatus::Retrying => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.paid + self.valid + self.rate_limited + self.invalid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// `None` before the first run
    pub run_id: Option<String>,
    pub completed: usize,
    pub total: usize,
    pub cancelled: bool,
    pub finished: bool,
    pub counts: StatusCounts,
}

impl Progress {
    pub fn started(run_id: impl Into<String>, total: usize) -> Self {
        Self {
            run_id: Some(run_id.into()),
            total,
            ..Self::default()
        }
    }

    /// Completed share in `[0.0, 1.0]`; an empty run counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_terminal_statuses() {
        let mut counts = StatusCounts::default();
        counts.record(KeyStatus::Valid);
        counts.record(KeyStatus::Valid);
        counts.record(KeyStatus::Paid);
        counts.record(KeyStatus::Retrying);
        assert_eq!(counts.get(KeyStatus::Valid), 2);
        assert_eq!(counts.get(KeyStatus::Paid), 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn fraction_handles_empty_run() {
        assert_eq!(Progress::default().fraction(), 1.0);
        let mut p = Progress::started("run", 4);
        p.completed = 1;
        assert_eq!(p.fraction(), 0.25);
    }

    #[test]
    fn serializes_counts_inline() {
        let p = Progress::started("abc", 2);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["run_id"], "abc");
        assert_eq!(json["counts"]["rate_limited"], 0);
        assert_eq!(json["finished"], false);
    }
}
