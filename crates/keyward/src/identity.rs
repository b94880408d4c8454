//! Verified identity to principal mapping.
//!
//! The table is built once at startup and shared read-only between request
//! tasks. Every lookup is written to the `keyward::audit` log target.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use keyward_common::Principal;

/// Log target for identity resolution audit events.
pub const AUDIT_TARGET: &str = "keyward::audit";

/// Maps verified certificate common names onto principals.
///
/// Matching is exact and case-sensitive. Several claims may alias the same
/// principal. Cloning is cheap; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    table: Arc<HashMap<String, Principal>>,
}

impl IdentityResolver {
    /// Build a resolver from `(claim, principal)` pairs.
    ///
    /// If a claim appears more than once the last entry wins.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Principal)>,
        S: Into<String>,
    {
        let table = entries
            .into_iter()
            .map(|(claim, principal)| (claim.into(), principal))
            .collect();
        Self {
            table: Arc::new(table),
        }
    }

    /// Look up the principal for a verified claim.
    ///
    /// Returns `None` for claims that are not in the table. That is an
    /// authorization outcome, not an error.
    #[must_use]
    pub fn resolve(&self, claim: &str) -> Option<Principal> {
        match self.table.get(claim) {
            Some(principal) => {
                info!(
                    target: AUDIT_TARGET,
                    claim,
                    principal_id = principal.id,
                    username = %principal.username,
                    outcome = "authorized",
                    "Resolved client identity"
                );
                Some(principal.clone())
            }
            None => {
                warn!(
                    target: AUDIT_TARGET,
                    claim,
                    outcome = "unauthorized",
                    "Client identity is not authorized"
                );
                None
            }
        }
    }

    /// Number of claims in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
