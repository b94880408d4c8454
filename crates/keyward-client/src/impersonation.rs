//! Impersonation token client.
//!
//! Calls `POST {base}/api/v4/users/{id}/impersonation_tokens` with the
//! administrator credential in the `PRIVATE-TOKEN` header. The upstream
//! answers `201 Created` with the new token in the `token` field.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, error};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use keyward_common::Config;

use crate::CredentialIssuer;
use crate::error::{IssueError, Result};

/// Scope requested for every impersonation token.
pub const DEFAULT_SCOPES: &[&str] = &["api"];

/// Prefix of the token name shown in the upstream's token list.
pub const DEFAULT_NAME_PREFIX: &str = "keyward";

/// How much of an error body to keep in [`IssueError::UnexpectedStatus`].
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Serialize)]
struct CreateTokenRequest<'a> {
    name: String,
    scopes: &'a [String],
    expires_at: NaiveDate,
}

#[derive(Deserialize)]
struct CreateTokenResponse {
    token: String,
}

/// HTTP client for the upstream's impersonation token API.
///
/// Each call is bounded by the configured issuer timeout and is never retried.
///
/// # Security
///
/// The administrator credential is stored using the `secrecy` crate and is
/// redacted from `Debug` output.
#[derive(Clone)]
pub struct ImpersonationClient {
    client: reqwest::Client,
    admin_token: Arc<SecretString>,
    base_url: Url,
    timeout: Duration,
    scopes: Arc<[String]>,
    name_prefix: String,
}

impl std::fmt::Debug for ImpersonationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImpersonationClient")
            .field("admin_token", &"[REDACTED]")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl ImpersonationClient {
    /// Create a new client from the proxy configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream URL cannot be used as a base or the
    /// HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        if config.upstream_url.cannot_be_a_base() {
            return Err(IssueError::Configuration(format!(
                "upstream URL '{}' cannot be used as a base",
                config.upstream_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.issuer_timeout)
            .build()
            .map_err(|e| IssueError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            admin_token: Arc::new(config.admin_token.clone()),
            base_url: config.upstream_url.clone(),
            timeout: config.issuer_timeout,
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        })
    }

    /// Override the scopes requested for each token.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Override the prefix used for token names.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// The upstream base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, principal_id: u64) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let url = format!("{base}/api/v4/users/{principal_id}/impersonation_tokens");
        Url::parse(&url)
            .map_err(|e| IssueError::Configuration(format!("Invalid URL '{url}': {e}")))
    }

    fn map_send_error(&self, err: reqwest::Error) -> IssueError {
        if err.is_timeout() {
            IssueError::Timeout(self.timeout)
        } else {
            IssueError::Network(err)
        }
    }
}

#[async_trait]
impl CredentialIssuer for ImpersonationClient {
    async fn issue(&self, principal_id: u64, valid_until: NaiveDate) -> Result<SecretString> {
        let url = self.endpoint(principal_id)?;
        let body = CreateTokenRequest {
            name: format!("{}-{}", self.name_prefix, uuid::Uuid::new_v4()),
            scopes: &self.scopes,
            expires_at: valid_until,
        };

        debug!(
            "Requesting impersonation token for user {principal_id} valid until {valid_until}"
        );

        let response = self
            .client
            .post(url)
            .header("PRIVATE-TOKEN", self.admin_token.expose_secret())
            .header("Content-Type", "application/json")
            .body(
                serde_json::to_string(&body)
                    .map_err(|e| IssueError::Configuration(e.to_string()))?,
            )
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_send_error(e))?;

        if status != StatusCode::CREATED {
            let body: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            error!(
                "Impersonation token request for user {principal_id} failed with status {}",
                status.as_u16()
            );
            return Err(IssueError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CreateTokenResponse = serde_json::from_str(&text)
            .map_err(|e| IssueError::MalformedResponse(format!("invalid JSON: {e}")))?;

        if parsed.token.is_empty() {
            return Err(IssueError::MalformedResponse("empty token".to_string()));
        }
        // The token ends up in request headers verbatim.
        if !parsed.token.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(IssueError::MalformedResponse(
                "token contains characters not allowed in a header".to_string(),
            ));
        }

        Ok(SecretString::from(parsed.token))
    }
}
