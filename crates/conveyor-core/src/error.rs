//! Unified error type shared by the Conveyor crates.

use thiserror::Error;

/// Process-level error type for Conveyor.
///
/// Crate-specific errors (such as the jobs crate's `JobError`) convert from
/// this type so configuration and bootstrap failures flow through `?`.
#[derive(Error, Debug)]
pub enum ConveyorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConveyorError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
