//! Result and error types for Sosegar.

use thiserror::Error;

/// Result type for Sosegar operations
pub type SosegarResult<T> = Result<T, SosegarError>;

/// Errors that can occur in Sosegar
#[derive(Debug, Error)]
pub enum SosegarError {
    /// Caller-supplied deadline expired while waiting for network idle
    #[error("Idle wait exceeded deadline of {ms}ms")]
    Timeout {
        /// Deadline in milliseconds
        ms: u64,
    },

    /// Request interception could not be installed on the page
    #[error("Failed to install request interception: {message}")]
    InterceptionInstall {
        /// Error message
        message: String,
    },

    /// Out-of-band asset fetch failed
    ///
    /// The gate recovers from this locally by passing the original request
    /// through; it only surfaces through logs and probe implementations.
    #[error("Out-of-band fetch of {url} failed: {message}")]
    ProbeFailed {
        /// URL that was probed
        url: String,
        /// Error message
        message: String,
    },

    /// Unknown idle mode string
    #[error("Unknown idle mode: {value} (expected networkidle0 or networkidle2)")]
    UnknownIdleMode {
        /// The rejected value
        value: String,
    },

    /// Page session error
    #[error("Session error: {message}")]
    Session {
        /// Error message
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
