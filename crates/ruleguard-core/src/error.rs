//! Error types for Ruleguard
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Ruleguard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ruleguard error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Rule Errors
    // =========================================================================
    #[error("Rule not found: {id}")]
    RuleNotFound { id: String },

    #[error("Rule already exists: {id}")]
    RuleAlreadyExists { id: String },

    #[error("Invalid rule: {id}, reason: {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Rule store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    // =========================================================================
    // File System Errors
    // =========================================================================
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Write failed: {path}: no space left on device")]
    DiskFull { path: String },

    #[error("{operation} failed: {path}: operation interrupted")]
    Interrupted { path: String, operation: String },

    #[error("Short write: {path}, wrote {written} of {expected} bytes")]
    ShortWrite {
        path: String,
        written: usize,
        expected: usize,
    },

    #[error("Corrupt record: {path}, reason: {reason}")]
    CorruptRecord { path: String, reason: String },

    // =========================================================================
    // Trace Errors
    // =========================================================================
    #[error("Invalid span: trace {trace_id}, reason: {reason}")]
    InvalidSpan { trace_id: String, reason: String },

    #[error("Trace buffer full: {count} traces buffered, max: {max}")]
    TraceBufferFull { count: usize, max: usize },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid argument: {name}, reason: {reason}")]
    InvalidArgument { name: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a rule not found error
    pub fn rule_not_found(id: impl Into<String>) -> Self {
        Self::RuleNotFound { id: id.into() }
    }

    /// Create a file not found error
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a disk full error
    pub fn disk_full(path: impl Into<String>) -> Self {
        Self::DiskFull { path: path.into() }
    }

    /// Create an interrupted operation error
    pub fn interrupted(path: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Interrupted {
            path: path.into(),
            operation: operation.into(),
        }
    }

    /// Create a corrupt record error
    pub fn corrupt_record(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is the kind an unreliable disk produces
    ///
    /// These are expected under fault injection and must never be treated
    /// as programmer errors.
    pub fn is_io_fault(&self) -> bool {
        matches!(
            self,
            Self::DiskFull { .. }
                | Self::Interrupted { .. }
                | Self::ShortWrite { .. }
                | Self::CorruptRecord { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed {
            reason: err.to_string(),
        }
    }
}
