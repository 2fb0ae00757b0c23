//! Error types for paperlink.
//!
//! Library crates use [`PaperLinkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all paperlink operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperLinkError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the retried search path.
    #[error("network error: {0}")]
    Network(String),

    /// JSON parsing error (dump records, API responses).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The dump file does not exist. Fatal before any work starts.
    #[error("input not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    /// The search endpoint kept failing for one key after all retries.
    #[error(
        "search unavailable for arXiv {arxiv_id} after {attempts} attempt(s): {reason}\n  request: {request}"
    )]
    EnrichmentUnavailable {
        arxiv_id: String,
        attempts: u32,
        reason: String,
        /// Equivalent `curl` invocation for manual reproduction.
        request: String,
    },

    /// Writing a link statement to the remote graph failed for one row.
    #[error("publication failed for arXiv {arxiv_id} ({qid}): {reason}")]
    PublicationFailure {
        arxiv_id: String,
        qid: String,
        reason: String,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperLinkError>;

impl PaperLinkError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Build a [`PaperLinkError::PublicationFailure`].
    pub fn publication(
        arxiv_id: impl Into<String>,
        qid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PublicationFailure {
            arxiv_id: arxiv_id.into(),
            qid: qid.into(),
            reason: reason.into(),
        }
    }
}
