//! Configuration and input errors shared by the workspace

use thiserror::Error;

/// Errors raised while loading configuration or reading key input
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
