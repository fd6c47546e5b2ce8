//! Error types for CacheQueue
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CacheQueueError
pub type Result<T> = std::result::Result<T, CacheQueueError>;

/// Unified error type for CacheQueue operations
#[derive(Debug, Error)]
pub enum CacheQueueError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid task '{0}'")]
    UnknownTask(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("No worker attached to client")]
    NoWorker,

    // -------------------------------------------------------------------------
    // Task Errors
    // -------------------------------------------------------------------------
    #[error("Task '{task}' failed: {message}")]
    Task { task: String, message: String },

    #[error("Job {key:?} buried for {seconds:?} seconds")]
    Buried {
        key: Option<String>,
        seconds: Option<u64>,
    },

    #[error("Job {key:?} requeued (delay {delay:?}, fresh for {fresh_for:?})")]
    Requeued {
        key: Option<String>,
        delay: Option<u64>,
        fresh_for: Option<u64>,
    },
}

impl CacheQueueError {
    /// Shorthand for a generic task failure
    pub fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Task {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Backend or transport failures that may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_))
    }

    /// Failures caused by how the system was set up; never worth retrying
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownTask(_) | Self::MissingParameter(_) | Self::NoWorker
        )
    }

    /// Bury/requeue signals raised by a task after bookkeeping completed
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Buried { .. } | Self::Requeued { .. })
    }
}

impl From<bincode::Error> for CacheQueueError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
