//! Error types for the registry API client

use thiserror::Error;

/// Errors that can occur when talking to the registry-family APIs
#[derive(Debug, Error)]
pub enum RegistryApiError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential was rejected by the API
    #[error("not authenticated - run `prov-ctl auth login` first")]
    Unauthorized,

    /// Requested resource was not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Application-level rejection (4xx), surfaced verbatim
    #[error("registry rejected the request ({status}): {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Server error (5xx)
    #[error("registry server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        message: String,
    },

    /// A 2xx response whose envelope reported failure
    #[error("registry call was unsuccessful: {0}")]
    Unsuccessful(String),

    /// Failed to parse the API response
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Locally rejected subtype filter
    #[error("invalid subtype filter '{given}'; valid options: {}", .valid.join(", "))]
    InvalidSubtype {
        given: String,
        valid: Vec<&'static str>,
    },
}

/// Result type alias for registry API operations
pub type Result<T> = std::result::Result<T, RegistryApiError>;
