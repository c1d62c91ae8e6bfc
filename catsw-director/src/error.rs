//! Error types for catsw-director
//!
//! Only startup can fail with these; once the control loop is running every
//! collaborator failure is contained, logged and retried on the next cycle.

use thiserror::Error;

/// Main error type for catsw-director
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] catsw_common::Error),

    /// A worker thread could not be spawned
    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using catsw-director Error
pub type Result<T> = std::result::Result<T, Error>;
