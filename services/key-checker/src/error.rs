//! Service-specific error types

use thiserror::Error;

/// Errors at the edges of the one-shot run: reading keys and writing the report.
///
/// Per-key failures never surface here; they are record statuses.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to read keys from {source_name}: {source}")]
    KeysInput {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write report to {path}: {source}")]
    ReportOutput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode report: {0}")]
    ReportEncode(#[from] serde_json::Error),

    #[error("missing value for {0}")]
    MissingArgValue(&'static str),

    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
