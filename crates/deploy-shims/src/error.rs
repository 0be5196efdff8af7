//! Error types for deploy-shims

use thiserror::Error;

/// Errors returned by the external adapters
#[derive(Error, Debug)]
pub enum ShimError {
    /// Build process exited non-zero or produced no release id
    #[error("{0}")]
    BuildExecution(String),

    /// Finalize call reported failure
    #[error("Failed to finalize release {release_id}: {reason}")]
    Finalize { release_id: u64, reason: String },

    /// Git command failed
    #[error("{0}")]
    Git(String),

    /// The reference to create already exists on the source host
    #[error("Reference already exists: {reference}")]
    RefAlreadyExists { reference: String },

    /// External process was stopped by a termination signal
    #[error("{program} was interrupted by {signal}")]
    Interrupted { program: String, signal: String },

    /// Authentication against an API or CLI failed
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// Non-success API response
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ShimError {
    fn from(err: reqwest::Error) -> Self {
        ShimError::Http(err.to_string())
    }
}
