//! Error types for the keyward daemon.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur while starting or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// I/O error (config and PEM files, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required setting has no value. Fatal at startup.
    #[error("Required configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    /// Configuration is present but unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential settings violate the cache invariants.
    #[error("Invalid credential settings: {0}")]
    InvalidCredentials(#[from] keyward::ConfigError),

    /// Certificate or key material could not be loaded.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The issuer client could not be built.
    #[error("Issuer error: {0}")]
    Issuer(#[from] keyward::IssueError),

    /// Metric registration failed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The forwarding client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Result type alias using `DaemonError`.
pub type Result<T> = std::result::Result<T, DaemonError>;

impl From<rustls::Error> for DaemonError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

/// Errors while forwarding a request upstream.
///
/// All of them are answered with `502 Bad Gateway`.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
    }
}
