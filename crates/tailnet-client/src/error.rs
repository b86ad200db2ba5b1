//! Tailnet client errors

use thiserror::Error;

/// Errors that can occur when talking to the tailnet APIs
#[derive(Debug, Error)]
pub enum TailnetError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error status
    #[error("Tailnet API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or description
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid or expired key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TailnetError {
    /// True if the directory reported that the record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TailnetError::NotFound(_))
    }

    /// True for failures that are expected to clear up on retry
    /// (connectivity, timeouts, 429 and 5xx responses).
    pub fn is_transient(&self) -> bool {
        match self {
            TailnetError::Http(_) => true,
            TailnetError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
