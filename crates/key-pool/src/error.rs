//! Error types for batch validation

use crate::record::KeyStatus;

/// Errors from batch setup and record bookkeeping.
///
/// Per-key failures are never errors: they end up as the record's status and
/// `last_error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no keys to validate: input is empty after trimming")]
    EmptyBatch,

    #[error("no model selected")]
    NoModel,

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: KeyStatus, to: KeyStatus },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("a batch run is in progress")]
    RunInProgress,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
