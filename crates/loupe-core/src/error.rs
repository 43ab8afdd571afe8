//! Unified error type bridging subsystem errors.
//!
//! Resolution failures are deliberately NOT errors — they degrade to an
//! `Any` type. [`LoupeError`] covers the genuinely exceptional paths:
//! filesystem problems, corrupt internal state and bad consumer input.
//! Nothing here is fatal to a serving process; the caller decides whether to
//! degrade or report.

use thiserror::Error;

/// Unified error type for engine consumers.
#[derive(Debug, Error)]
pub enum LoupeError {
    /// File not tracked by the engine.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// IO error while reading sources or cache entries.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error for cache payloads.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal invariant violation.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LoupeError {
    pub fn internal(message: impl Into<String>) -> Self {
        LoupeError::Internal {
            message: message.into(),
        }
    }

    pub fn file_not_found(path: impl Into<String>) -> Self {
        LoupeError::FileNotFound { path: path.into() }
    }
}

/// Result alias for engine operations.
pub type LoupeResult<T> = Result<T, LoupeError>;
