//! Error types for Resumio core

use thiserror::Error;

/// Errors that can occur during a resumable download
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Transfer interrupted: {0}")]
    Interrupted(#[source] std::io::Error),

    #[error("Stream ended early at byte {offset} with {remaining} bytes still expected")]
    Truncated { offset: u64, remaining: u64 },

    #[error("Object changed during download: expected version {expected}, got {}", actual.as_deref().unwrap_or("<rejected>"))]
    VersionMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Resume not supported: server ignored the requested range")]
    ResumeNotSupported,

    #[error("Response carried no version token (ETag)")]
    MissingVersionToken,

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Check if this error is a transient failure while reading a body.
    /// Only these are eligible for resumption.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloadError::Interrupted(_) | DownloadError::Truncated { .. }
        )
    }

    /// Check if the object changed underneath the download
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, DownloadError::VersionMismatch { .. })
    }
}
