use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Default time a minted credential is served from the cache (23 hours).
pub const DEFAULT_CACHE_LIFETIME: Duration = Duration::from_secs(23 * 60 * 60);

/// Default validity window requested from the upstream (24 hours).
pub const DEFAULT_VALIDITY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default bound on a single issuance call.
pub const DEFAULT_ISSUER_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest validity window the upstream accepts for impersonation tokens.
pub const MAX_VALIDITY_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Invalid proxy configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("upstream URL must use http or https, got '{0}'")]
    UnsupportedScheme(String),

    #[error("upstream URL must include a host")]
    MissingHost,

    #[error("administrator credential is empty")]
    EmptyAdminToken,

    #[error("cache lifetime ({cache:?}) must be non-zero and shorter than the validity window ({window:?})")]
    CacheOutlivesCredential { cache: Duration, window: Duration },

    #[error("validity window ({0:?}) exceeds the upstream maximum")]
    ValidityWindowTooLong(Duration),

    #[error("issuer timeout must be non-zero")]
    ZeroIssuerTimeout,
}

/// Configuration for credential issuance and caching.
///
/// Passed explicitly into the issuer, the credential cache and the request
/// mutator. The administrator credential is held as a `SecretString`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use keyward_common::Config;
///
/// let config = Config::new("https://gitlab.example.com".parse().unwrap(), "glpat-admin")
///     .with_issuer_timeout(Duration::from_secs(2));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct Config {
    /// Base URL of the upstream service.
    pub upstream_url: Url,
    /// Administrator credential used to mint impersonation tokens.
    pub admin_token: SecretString,
    /// How long a minted credential is reused before a new one is requested.
    pub cache_lifetime: Duration,
    /// Validity requested from the upstream for each new credential.
    pub validity_window: Duration,
    /// Upper bound on one issuance round trip.
    pub issuer_timeout: Duration,
}

impl Config {
    /// Creates a configuration with the default lifetimes and timeout.
    pub fn new(upstream_url: Url, admin_token: impl Into<String>) -> Self {
        Self {
            upstream_url,
            admin_token: SecretString::from(admin_token.into()),
            cache_lifetime: DEFAULT_CACHE_LIFETIME,
            validity_window: DEFAULT_VALIDITY_WINDOW,
            issuer_timeout: DEFAULT_ISSUER_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_cache_lifetime(mut self, cache_lifetime: Duration) -> Self {
        self.cache_lifetime = cache_lifetime;
        self
    }

    #[must_use]
    pub const fn with_validity_window(mut self, validity_window: Duration) -> Self {
        self.validity_window = validity_window;
        self
    }

    #[must_use]
    pub const fn with_issuer_timeout(mut self, issuer_timeout: Duration) -> Self {
        self.issuer_timeout = issuer_timeout;
        self
    }

    /// Checks the invariants the cache relies on.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The upstream URL is not http(s) or has no host
    /// - The administrator credential is empty
    /// - The cache lifetime is zero or not strictly shorter than the validity window
    /// - The validity window exceeds [`MAX_VALIDITY_WINDOW`]
    /// - The issuer timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        use secrecy::ExposeSecret;

        match self.upstream_url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if self.upstream_url.host_str().is_none() {
            return Err(ConfigError::MissingHost);
        }
        if self.admin_token.expose_secret().trim().is_empty() {
            return Err(ConfigError::EmptyAdminToken);
        }
        if self.validity_window > MAX_VALIDITY_WINDOW {
            return Err(ConfigError::ValidityWindowTooLong(self.validity_window));
        }
        if self.cache_lifetime.is_zero() || self.cache_lifetime >= self.validity_window {
            return Err(ConfigError::CacheOutlivesCredential {
                cache: self.cache_lifetime,
                window: self.validity_window,
            });
        }
        if self.issuer_timeout.is_zero() {
            return Err(ConfigError::ZeroIssuerTimeout);
        }
        Ok(())
    }

    /// Local reuse deadline for a credential minted at `now`.
    ///
    /// Saturates to `now` (an immediately stale entry) if the lifetime does
    /// not fit in a timestamp.
    #[must_use]
    pub fn cache_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        offset(now, self.cache_lifetime)
    }

    /// Validity deadline to request from the upstream for a credential minted at `now`.
    #[must_use]
    pub fn validity_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        offset(now, self.validity_window)
    }
}

fn offset(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("upstream_url", &self.upstream_url.as_str())
            .field("admin_token", &"[REDACTED]")
            .field("cache_lifetime", &self.cache_lifetime)
            .field("validity_window", &self.validity_window)
            .field("issuer_timeout", &self.issuer_timeout)
            .finish()
    }
}
