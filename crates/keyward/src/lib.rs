//! # keyward
//!
//! Authentication core of an mTLS reverse proxy.
//!
//! A client presents a certificate; the TLS layer verifies it and attaches
//! the subject common name to the request. This crate then:
//!
//! - resolves that name to a [`Principal`] through a fixed [`IdentityResolver`] table
//! - fetches a short-lived impersonation token for the principal from the
//!   [`CredentialCache`], minting one upstream on a miss
//! - injects `PRIVATE-TOKEN` and `Authorization: Basic` headers with the
//!   [`RequestMutator`]
//!
//! Credential injection fails open. A request whose identity is unknown, or
//! whose credential cannot be minted, is forwarded unauthenticated and the
//! reason is returned as an [`AuthOutcome`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use keyward::{
//!     Config, CredentialCache, IdentityAssertion, IdentityResolver, ImpersonationClient,
//!     Principal, RequestMutator,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::new("https://gitlab.example.com".parse()?, "glpat-admin");
//! let issuer = Arc::new(ImpersonationClient::new(&config)?);
//! let cache = Arc::new(CredentialCache::new(issuer, &config));
//! let resolver = IdentityResolver::new([("alice", Principal::new(3, "alice"))]);
//! let mutator = RequestMutator::new(resolver, cache);
//!
//! let mut request = http::Request::builder().uri("/api/v4/user").body(())?;
//! request.extensions_mut().insert(IdentityAssertion::new("alice"));
//!
//! let outcome = mutator.authenticate(&mut request).await;
//! println!("{}", outcome.label());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod identity;
pub mod mutator;

pub use keyward_client::*;
pub use keyward_common::*;

pub use cache::{CacheRecorder, CredentialCache, NoopRecorder};
pub use error::{AuthError, CredentialError};
pub use identity::IdentityResolver;
pub use mutator::{AuthOutcome, RequestMutator, basic_credential};
