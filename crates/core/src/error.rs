//! Error types for tfengine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations.
///
/// Subprocess failures never show up here: a command that exits non-zero or
/// cannot be started is reported through the response stream instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to deliver response: {0}")]
    Transport(#[from] TransportFault),

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by a [`ResponseSink`](crate::ResponseSink) that can no longer
/// deliver responses, e.g. because the caller disconnected.
#[derive(Debug, Clone, Error)]
#[error("transport closed: {reason}")]
pub struct TransportFault {
    pub reason: String,
}

impl TransportFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The subprocess could not be started at all.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("executable '{command}' not found in PATH ({search_path})")]
    NotFound { command: String, search_path: String },

    #[error("working directory '{}' does not exist or is not a directory", path.display())]
    WorkingDir { path: PathBuf },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
