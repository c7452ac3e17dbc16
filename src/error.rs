//! Error types for the registry-search crate.
//!
//! All errors use stable string messages suitable for display to users
//! and programmatic handling. Query parameters never appear in error
//! messages; only page numbers, status codes and registry messages do.

use std::fmt;

/// Errors that can occur while querying the business registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry kept answering 429 after every retry was spent.
    #[error("rate limited on page {page} after {attempts} attempts")]
    RateLimited {
        /// Page that was being fetched.
        page: u32,
        /// Total attempts made, including the first.
        attempts: u32,
    },

    /// The request kept timing out after every retry was spent.
    #[error("timed out on page {page} after {attempts} attempts")]
    Timeout {
        /// Page that was being fetched.
        page: u32,
        /// Total attempts made, including the first.
        attempts: u32,
    },

    /// The registry answered with a non-retryable HTTP status.
    #[error("registry returned {status} on page {page}: {message}")]
    Status {
        /// Page that was being fetched.
        page: u32,
        /// HTTP status code.
        status: u16,
        /// `message` field of the JSON error body, or the start of the raw body.
        message: String,
    },

    /// The request could not be sent or the connection failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The registry response body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// The caller's query cannot be sent to the registry.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl RegistryError {
    /// Whether this error came from exhausting the 429/timeout retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }
}

/// Convenience type alias for registry-search results.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Which kind of transient failure a retry is answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransientKind {
    RateLimited,
    Timeout,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("429 Too Many Requests"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}
