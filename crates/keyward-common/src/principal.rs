use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal user record that credentials are issued for.
///
/// Principals are defined once at startup and never mutated. Several
/// identity claims may map onto the same principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Upstream user ID.
    pub id: u64,
    /// Upstream username, used as the user part of the Basic credential.
    pub username: String,
}

impl Principal {
    /// Creates a new principal.
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ID: {})", self.username, self.id)
    }
}

/// Verified identity claim taken from a client certificate.
///
/// The transport layer only produces one after the certificate chain has been
/// validated against the trusted CA, so the value can be used as-is for
/// lookups. It travels with the request as an HTTP extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityAssertion(String);

impl IdentityAssertion {
    /// Wraps a verified common name.
    pub fn new(claim: impl Into<String>) -> Self {
        Self(claim.into())
    }

    /// Returns the raw claim.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityAssertion {
    fn from(claim: &str) -> Self {
        Self::new(claim)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_principal_display() {
        let principal = Principal::new(3, "alice");
        assert_eq!(principal.to_string(), "alice (ID: 3)");
    }

    #[test]
    fn test_principal_deserialize() {
        let principal: Principal =
            serde_json::from_str(r#"{"id": 1, "username": "root"}"#).unwrap();
        assert_eq!(principal, Principal::new(1, "root"));
    }

    #[test]
    fn test_identity_assertion_round_trips_claim() {
        let claim = IdentityAssertion::from("jonathanp");
        assert_eq!(claim.as_str(), "jonathanp");
        assert_eq!(claim.to_string(), "jonathanp");
    }
}
