//! Error types for Retrace

use std::io;
use thiserror::Error;

/// Result type for Retrace operations
pub type Result<T> = std::result::Result<T, RetraceError>;

/// Errors that can occur in Retrace
#[derive(Debug, Error)]
pub enum RetraceError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Recorder started while already running
    #[error("Recorder is already running on port {0}")]
    AlreadyRunning(u16),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Capture log line that could not be parsed
    #[error("Invalid capture record: {0}")]
    InvalidRecord(String),

    /// Upstream request failed
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}
