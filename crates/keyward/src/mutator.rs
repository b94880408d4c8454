//! Per-request credential injection.
//!
//! Runs once per inbound request, before forwarding. The verified identity is
//! resolved to a principal, a credential is fetched from the cache, and two
//! headers are set on the outbound request:
//!
//! - `PRIVATE-TOKEN: <token>` for API access
//! - `Authorization: Basic base64(username:token)` for Git over HTTPS
//!
//! Every failure is fail-open: the request is forwarded as it arrived and the
//! reason is reported in the returned [`AuthOutcome`].

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use http::Request;
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};

use keyward_common::{IdentityAssertion, Principal};

use crate::cache::CredentialCache;
use crate::error::AuthError;
use crate::identity::IdentityResolver;

/// Header carrying the impersonation token for API requests.
pub static PRIVATE_TOKEN: HeaderName = HeaderName::from_static("private-token");

/// Result of [`RequestMutator::authenticate`].
#[derive(Debug)]
#[must_use]
pub enum AuthOutcome {
    /// Both credential headers were set for `principal`.
    Modified { principal: Principal },
    /// The request was left untouched.
    Unmodified(AuthError),
}

impl AuthOutcome {
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        matches!(self, Self::Modified { .. })
    }

    /// Short, stable label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Modified { .. } => "modified",
            Self::Unmodified(err) => err.label(),
        }
    }
}

/// Encode `username:token` as an HTTP Basic credential.
#[must_use]
pub fn basic_credential(username: &str, token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{token}")))
}

/// Injects impersonation credentials into outbound requests.
///
/// Cloning is cheap; clones share the resolver table and the cache.
#[derive(Debug, Clone)]
pub struct RequestMutator {
    resolver: IdentityResolver,
    cache: Arc<CredentialCache>,
}

impl RequestMutator {
    pub const fn new(resolver: IdentityResolver, cache: Arc<CredentialCache>) -> Self {
        Self { resolver, cache }
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Authenticate `request` as the principal behind its verified identity.
    ///
    /// The identity is read from the request's [`IdentityAssertion`]
    /// extension, which the TLS layer attaches after verifying the client
    /// certificate. Existing credential headers are overwritten on success,
    /// so calling this twice on the same request is harmless. On any failure
    /// the request is not touched.
    pub async fn authenticate<B>(&self, request: &mut Request<B>) -> AuthOutcome {
        let Some(claim) = request.extensions().get::<IdentityAssertion>().cloned() else {
            warn!("No verified client identity on request, forwarding unauthenticated");
            return AuthOutcome::Unmodified(AuthError::UnverifiedClient);
        };

        let Some(principal) = self.resolver.resolve(claim.as_str()) else {
            return AuthOutcome::Unmodified(AuthError::UnknownIdentity {
                claim: claim.as_str().to_string(),
            });
        };

        let token = match self.cache.get_or_generate(&principal).await {
            Ok(token) => token,
            Err(e) => {
                error!(
                    principal_id = principal.id,
                    error = %e,
                    "Failed to obtain credential, forwarding unauthenticated"
                );
                return AuthOutcome::Unmodified(AuthError::IssuanceFailed(e));
            }
        };

        let Some((private_token, authorization)) = header_values(&principal, &token) else {
            // Unusable until it expires, so do not keep serving it.
            self.cache.invalidate(principal.id);
            error!(
                principal_id = principal.id,
                "Credential is not a valid header value, forwarding unauthenticated"
            );
            return AuthOutcome::Unmodified(AuthError::InvalidHeaderValue {
                principal_id: principal.id,
            });
        };

        let headers = request.headers_mut();
        headers.insert(PRIVATE_TOKEN.clone(), private_token);
        headers.insert(AUTHORIZATION, authorization);

        info!(
            principal_id = principal.id,
            username = %principal.username,
            "Injected credential headers"
        );
        AuthOutcome::Modified { principal }
    }
}

fn header_values(principal: &Principal, token: &SecretString) -> Option<(HeaderValue, HeaderValue)> {
    let token = token.expose_secret();
    let mut private_token = HeaderValue::from_str(token).ok()?;
    let mut authorization =
        HeaderValue::from_str(&basic_credential(&principal.username, token)).ok()?;
    private_token.set_sensitive(true);
    authorization.set_sensitive(true);
    Some((private_token, authorization))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use keyward_client::{CredentialIssuer, ImpersonationClient};
    use keyward_common::Config;
    use proptest::prelude::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn decode_basic(value: &HeaderValue) -> String {
        let encoded = value.to_str().unwrap().strip_prefix("Basic ").unwrap();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    fn request_from(claim: Option<&str>) -> Request<()> {
        let mut request = Request::builder()
            .uri("https://proxy.internal/api/v4/projects")
            .body(())
            .unwrap();
        if let Some(claim) = claim {
            request.extensions_mut().insert(IdentityAssertion::new(claim));
        }
        request
    }

    async fn mutator_for(mock_server: &MockServer, timeout: Duration) -> RequestMutator {
        let config = Config::new(mock_server.uri().parse().unwrap(), "admin-token")
            .with_issuer_timeout(timeout);
        let issuer = Arc::new(ImpersonationClient::new(&config).unwrap());
        let cache = Arc::new(CredentialCache::new(issuer, &config));
        let resolver = IdentityResolver::new([
            ("jonathanp", Principal::new(1, "root")),
            ("bob", Principal::new(1, "root")),
            ("alice", Principal::new(3, "alice")),
        ]);
        RequestMutator::new(resolver, cache)
    }

    async fn mount_token(mock_server: &MockServer, user: u64, token: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/api/v4/users/{user}/impersonation_tokens")))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "token": token })))
            .mount(mock_server)
            .await;
    }

    #[tokio::test]
    async fn test_alice_gets_both_headers() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 3, "tok-A").await;
        let mutator = mutator_for(&mock_server, Duration::from_secs(5)).await;

        let mut request = request_from(Some("alice"));
        let outcome = mutator.authenticate(&mut request).await;

        match outcome {
            AuthOutcome::Modified { principal } => assert_eq!(principal, Principal::new(3, "alice")),
            other => panic!("expected Modified, got {other:?}"),
        }

        let headers = request.headers();
        assert_eq!(headers.get(&PRIVATE_TOKEN).unwrap(), "tok-A");
        assert_eq!(decode_basic(headers.get(AUTHORIZATION).unwrap()), "alice:tok-A");
        assert!(headers.get(&PRIVATE_TOKEN).unwrap().is_sensitive());
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    /// Returns a token with a line break, which no header can carry.
    struct MalformedIssuer;

    #[async_trait]
    impl CredentialIssuer for MalformedIssuer {
        async fn issue(&self, _: u64, _: NaiveDate) -> keyward_client::Result<SecretString> {
            Ok(SecretString::from("tok\r\nX-Injected: 1"))
        }
    }

    #[tokio::test]
    async fn test_invalid_header_token_is_not_cached() {
        let config = Config::new("https://gitlab.example.com".parse().unwrap(), "admin");
        let cache = Arc::new(CredentialCache::new(Arc::new(MalformedIssuer), &config));
        let resolver = IdentityResolver::new([("alice", Principal::new(3, "alice"))]);
        let mutator = RequestMutator::new(resolver, Arc::clone(&cache));

        let mut request = request_from(Some("alice"));
        let outcome = mutator.authenticate(&mut request).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unmodified(AuthError::InvalidHeaderValue { principal_id: 3 })
        ));
        assert!(request.headers().get(&PRIVATE_TOKEN).is_none());
        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert!(cache.peek(3).is_none());
    }

    #[tokio::test]
    async fn test_unknown_identity_sets_no_headers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "x"})))
            .expect(0)
            .mount(&mock_server)
            .await;
        let mutator = mutator_for(&mock_server, Duration::from_secs(5)).await;

        let mut request = request_from(Some("unknown-hacker"));
        let outcome = mutator.authenticate(&mut request).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unmodified(AuthError::UnknownIdentity { ref claim }) if claim == "unknown-hacker"
        ));
        assert!(request.headers().get(&PRIVATE_TOKEN).is_none());
        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert!(mutator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_is_unverified() {
        let mock_server = MockServer::start().await;
        let mutator = mutator_for(&mock_server, Duration::from_secs(5)).await;

        let mut request = request_from(None);
        let outcome = mutator.authenticate(&mut request).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unmodified(AuthError::UnverifiedClient)
        ));
        assert_eq!(outcome.label(), "unverified_client");
        assert!(request.headers().is_empty());
    }

    #[tokio::test]
    async fn test_issuer_timeout_fails_open() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"token": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;
        let mutator = mutator_for(&mock_server, Duration::from_millis(100)).await;

        let mut request = request_from(Some("alice"));
        let outcome = mutator.authenticate(&mut request).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unmodified(AuthError::IssuanceFailed(_))
        ));
        assert!(request.headers().get(&PRIVATE_TOKEN).is_none());
        assert!(request.headers().get(AUTHORIZATION).is_none());
        assert!(mutator.cache().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_authenticate_is_consistent() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 3, "tok-A").await;
        let mutator = mutator_for(&mock_server, Duration::from_secs(5)).await;

        let mut request = request_from(Some("alice"));
        assert!(mutator.authenticate(&mut request).await.is_modified());
        assert!(mutator.authenticate(&mut request).await.is_modified());

        let headers = request.headers();
        assert_eq!(headers.get_all(&PRIVATE_TOKEN).iter().count(), 1);
        assert_eq!(headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(decode_basic(headers.get(AUTHORIZATION).unwrap()), "alice:tok-A");
    }

    #[tokio::test]
    async fn test_client_credentials_are_replaced() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server, 3, "tok-A").await;
        let mutator = mutator_for(&mock_server, Duration::from_secs(5)).await;

        let mut request = request_from(Some("alice"));
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer forged"));
        let _ = mutator.authenticate(&mut request).await;

        assert_eq!(
            decode_basic(request.headers().get(AUTHORIZATION).unwrap()),
            "alice:tok-A"
        );
    }

    #[tokio::test]
    async fn test_aliases_share_cached_credential() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/users/1/impersonation_tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": "tok-root"})))
            .expect(1)
            .mount(&mock_server)
            .await;
        let mutator = mutator_for(&mock_server, Duration::from_secs(5)).await;

        let mut first = request_from(Some("jonathanp"));
        let mut second = request_from(Some("bob"));
        let _ = mutator.authenticate(&mut first).await;
        let _ = mutator.authenticate(&mut second).await;

        assert_eq!(
            decode_basic(second.headers().get(AUTHORIZATION).unwrap()),
            "root:tok-root"
        );
        assert_eq!(mutator.cache().len(), 1);
    }

    #[test]
    fn test_basic_credential() {
        assert_eq!(basic_credential("alice", "tok-A"), "Basic YWxpY2U6dG9rLUE=");
    }

    proptest! {
        #[test]
        fn prop_basic_credential_decodes_to_username_colon_token(
            username in "[a-zA-Z0-9_.-]{1,32}",
            token in "[!-~]{1,64}",
        ) {
            let header = basic_credential(&username, &token);
            let encoded = header.strip_prefix("Basic ").unwrap();
            let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
            prop_assert_eq!(decoded, format!("{username}:{token}"));
        }
    }
}
