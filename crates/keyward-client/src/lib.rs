//! # keyward-client
//!
//! Client library for minting short-lived impersonation tokens.
//!
//! The credential cache talks to the upstream through the [`CredentialIssuer`]
//! trait. [`ImpersonationClient`] is the HTTP implementation: it calls the
//! upstream's admin API with an administrator credential and returns a token
//! scoped to a single user.
//!
//! ## Example
//!
//! ```no_run
//! use chrono::{Days, Utc};
//! use keyward_client::{CredentialIssuer, ImpersonationClient};
//! use keyward_common::Config;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::new("https://gitlab.example.com".parse()?, "glpat-admin");
//! let client = ImpersonationClient::new(&config)?;
//!
//! let tomorrow = Utc::now().date_naive() + Days::new(1);
//! let token = client.issue(3, tomorrow).await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;

pub mod error;
pub mod impersonation;

pub use error::{IssueError, Result};
pub use impersonation::ImpersonationClient;

/// Mints credentials that act as a given user upstream.
///
/// Implementations must be thread-safe; the cache calls `issue` from many
/// request tasks at once and never holds a lock while doing so.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Request a new credential for `principal_id`, valid until the end of
    /// `valid_until` in the upstream's calendar.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The call exceeds the configured timeout
    /// - Network communication fails
    /// - The upstream rejects the request
    /// - The response does not contain a usable token
    async fn issue(&self, principal_id: u64, valid_until: NaiveDate) -> Result<SecretString>;
}

#[async_trait]
impl<T: CredentialIssuer + ?Sized> CredentialIssuer for Arc<T> {
    async fn issue(&self, principal_id: u64, valid_until: NaiveDate) -> Result<SecretString> {
        (**self).issue(principal_id, valid_until).await
    }
}
