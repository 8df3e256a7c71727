//! Shared types for the key checker workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, mask_key};
