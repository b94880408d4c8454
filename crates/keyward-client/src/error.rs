//! Error types for the issuer client.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while minting an impersonation token.
///
/// None of these are retried by the caller; a failed issuance leaves the
/// request unauthenticated and the next request tries again.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IssueError {
    /// The upstream did not answer within the configured timeout.
    #[error("Issuer timed out after {0:?}")]
    Timeout(Duration),

    /// Network or HTTP transport failure.
    ///
    /// DNS resolution, connection refused, TLS errors and the like.
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The upstream answered with something other than `201 Created`.
    #[error("Upstream returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code returned by the upstream.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The response body could not be used as a credential.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Client configuration issue.
    ///
    /// Invalid base URL or an HTTP client that could not be built.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl IssueError {
    /// Returns true if the failure was the issuance timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Convenience alias for issuer results.
pub type Result<T> = std::result::Result<T, IssueError>;
