//! # keyward-common
//!
//! Common types shared by the keyward crates:
//! - Principals and the verified identity assertions that map onto them
//! - Cached impersonation credentials
//! - The proxy configuration passed into the cache, issuer and mutator
//! - A clock abstraction so expiry can be driven deterministically in tests
//!
//! ## Example
//!
//! ```
//! use keyward_common::{Config, IdentityAssertion, Principal};
//!
//! let config = Config::new("https://gitlab.example.com".parse().unwrap(), "admin-token");
//! assert!(config.validate().is_ok());
//!
//! let alice = Principal::new(3, "alice");
//! let claim = IdentityAssertion::new("alice");
//! assert_eq!(claim.as_str(), alice.username);
//! ```

/// Proxy configuration and validation.
pub mod config;
/// Cached credential records.
pub mod credential;
/// Principal and identity assertion types.
pub mod principal;

pub mod clock;

#[cfg(any(test, feature = "test-support"))]
pub use clock::MockClock;
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError};
pub use credential::CachedCredential;
pub use principal::{IdentityAssertion, Principal};
