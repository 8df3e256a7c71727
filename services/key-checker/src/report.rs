//! One-shot mode input and output
//!
//! Keys come from a file or stdin; the report groups results by status.

use std::path::Path;

use key_pool::{KeyStatus, RecordView, RunSummary};
use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

/// Read the key blob from `source` (`None` or `-` means stdin).
pub async fn read_keys(source: Option<&str>) -> Result<String> {
    match source {
        None | Some("-") => {
            let mut input = String::new();
            tokio::io::stdin()
                .read_to_string(&mut input)
                .await
                .map_err(|source| Error::KeysInput {
                    source_name: "stdin".into(),
                    source,
                })?;
            Ok(input)
        }
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::KeysInput {
                source_name: path.to_string(),
                source,
            }),
    }
}

/// Results grouped by status, in report order.
#[derive(Debug, Default, Serialize)]
pub struct GroupedResults {
    pub paid: Vec<RecordView>,
    pub valid: Vec<RecordView>,
    pub rate_limited: Vec<RecordView>,
    pub invalid: Vec<RecordView>,
    /// Keys never scheduled because the run was cancelled
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<RecordView>,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub summary: RunSummary,
    pub results: GroupedResults,
}

impl Report {
    pub fn new(summary: RunSummary, views: Vec<RecordView>) -> Self {
        let mut results = GroupedResults::default();
        for view in views {
            match view.status {
                KeyStatus::Paid => results.paid.push(view),
                KeyStatus::Valid => results.valid.push(view),
                KeyStatus::RateLimited => results.rate_limited.push(view),
                KeyStatus::Invalid => results.invalid.push(view),
                KeyStatus::Pending | KeyStatus::Testing | KeyStatus::Retrying => {
                    results.pending.push(view)
                }
            }
        }
        Self { summary, results }
    }
}

/// Write `report` as pretty JSON to `output`, or stdout when `None`.
pub fn write_report(report: &Report, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => std::fs::write(path, json + "\n").map_err(|source| Error::ReportOutput {
            path: path.display().to_string(),
            source,
        }),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
