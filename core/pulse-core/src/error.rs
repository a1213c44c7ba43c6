//! Error types for pulse-core operations.
//!
//! Each pipeline stage has its own error enum so callers can decide what is
//! recoverable; `PulseError` wraps them for code that only needs to report.

use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Stage Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Failures while detecting project context. Absence is not an error.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error while searching {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Another invocation holds the store; retry on the next invocation.
    #[error("offline queue is busy: {0}")]
    Busy(String),

    #[error("offline queue storage error: {context}: {source}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("offline queue I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode heartbeat: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BackoffError {
    /// Another invocation is updating the state file right now.
    #[error("backoff state is locked by another process")]
    Contended,

    #[error("backoff state I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode backoff state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("home directory not found")]
    NoHomeDir,

    #[error("configuration file malformed: {path}: {details}")]
    Malformed { path: PathBuf, details: String },

    #[error("configuration read failed: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration value for {field}: {details}")]
    InvalidValue { field: &'static str, details: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Crate Error
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Backoff(#[from] BackoffError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid heartbeat: {0}")]
    InvalidHeartbeat(#[from] pulse_protocol::ErrorInfo),

    #[error("HTTP client setup failed: {0}")]
    HttpClient(String),
}

/// Convenience type alias for Results using PulseError.
pub type Result<T> = std::result::Result<T, PulseError>;
