//! Error types for domainscout.
//!
//! Library crates use [`DomainScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all domainscout operations.
#[derive(Debug, thiserror::Error)]
pub enum DomainScoutError {
    /// Configuration loading or validation error, including a similarity mode
    /// with no threshold entry.
    #[error("config error: {message}")]
    Config { message: String },

    /// Embedding provider error (HTTP, auth, or response shape).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed vector, unknown enum text, bad input file).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Another pipeline run holds the lock for this database.
    #[error("a pipeline run is already in progress (lock file {lock_path:?})")]
    RunInProgress { lock_path: PathBuf },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DomainScoutError>;

impl DomainScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
