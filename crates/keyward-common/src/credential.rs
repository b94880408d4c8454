use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

/// Impersonation token held in the credential cache.
///
/// Entries are replaced wholesale, never updated in place. `expires_at` is
/// the local reuse deadline, which always falls before the upstream's own
/// validity deadline.
#[derive(Clone)]
pub struct CachedCredential {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

impl CachedCredential {
    /// Creates a cache entry for `token` that may be served until `expires_at`.
    #[must_use]
    pub const fn new(token: SecretString, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// The cached token.
    #[must_use]
    pub const fn token(&self) -> &SecretString {
        &self.token
    }

    /// The instant after which this entry must not be reused.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the entry may still be served at `now`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for CachedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedCredential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
