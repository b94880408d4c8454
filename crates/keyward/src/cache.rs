//! Impersonation credential cache.
//!
//! One entry per principal ID, generated on a miss and reused until its local
//! deadline. The local deadline (`cache_lifetime`, 23h by default) is kept
//! strictly inside the validity window requested from the upstream (24h), so
//! a cached token is never served after the upstream stops honouring it.
//!
//! Concurrent misses for the same principal are not coalesced: every racing
//! task calls the issuer and stores its own result, and the last write wins.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::SecretString;
use tracing::{debug, info, warn};

use keyward_client::CredentialIssuer;
use keyward_common::{CachedCredential, Clock, Config, Principal, SystemClock};

use crate::error::{CredentialError, Result};

/// Receives cache hit and miss events.
///
/// The daemon feeds these into its Prometheus counters.
pub trait CacheRecorder: Send + Sync {
    fn record_hit(&self);
    fn record_miss(&self);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl CacheRecorder for NoopRecorder {
    fn record_hit(&self) {}
    fn record_miss(&self) {}
}

/// Thread-safe get-or-generate store of impersonation credentials.
///
/// Reads take a shared lock; the exclusive lock is only taken to insert or
/// remove entries and is never held across the issuer call.
pub struct CredentialCache {
    entries: RwLock<HashMap<u64, CachedCredential>>,
    issuer: Arc<dyn CredentialIssuer>,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn CacheRecorder>,
    config: Arc<Config>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("entries", &self.entries.read().len())
            .field("cache_lifetime", &self.config.cache_lifetime)
            .field("validity_window", &self.config.validity_window)
            .finish_non_exhaustive()
    }
}

impl CredentialCache {
    /// Create an empty cache backed by `issuer`, reading the system clock.
    pub fn new(issuer: Arc<dyn CredentialIssuer>, config: &Config) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            issuer,
            clock: Arc::new(SystemClock),
            recorder: Arc::new(NoopRecorder),
            config: Arc::new(config.clone()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn CacheRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Return the live credential for `principal`, minting a new one on a
    /// miss or after expiry.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::IssuanceFailed`] if the issuer fails. The
    /// cache is left exactly as it was.
    pub async fn get_or_generate(&self, principal: &Principal) -> Result<SecretString> {
        let now = self.clock.now();

        if let Some(token) = self.live_token(principal.id, now) {
            self.recorder.record_hit();
            debug!(principal_id = principal.id, "Credential cache hit");
            return Ok(token);
        }
        self.recorder.record_miss();

        info!(
            principal_id = principal.id,
            username = %principal.username,
            "Generating new credential (cache miss or expired)"
        );

        let valid_until = self.config.validity_deadline(now).date_naive();
        let token = self
            .issuer
            .issue(principal.id, valid_until)
            .await
            .map_err(|source| {
                warn!(
                    principal_id = principal.id,
                    error = %source,
                    "Credential issuance failed"
                );
                CredentialError::IssuanceFailed {
                    principal_id: principal.id,
                    source,
                }
            })?;

        let expires_at = self.config.cache_deadline(self.clock.now());
        self.entries
            .write()
            .insert(principal.id, CachedCredential::new(token.clone(), expires_at));

        Ok(token)
    }

    fn live_token(&self, principal_id: u64, now: DateTime<Utc>) -> Option<SecretString> {
        let entries = self.entries.read();
        entries
            .get(&principal_id)
            .filter(|entry| entry.is_live_at(now))
            .map(|entry| entry.token().clone())
    }

    /// Return the stored entry for `principal_id` without generating one.
    ///
    /// Expired entries are returned as-is.
    #[must_use]
    pub fn peek(&self, principal_id: u64) -> Option<CachedCredential> {
        self.entries.read().get(&principal_id).cloned()
    }

    /// Drop the entry for `principal_id`, forcing the next request to mint.
    pub fn invalidate(&self, principal_id: u64) -> bool {
        self.entries.write().remove(&principal_id).is_some()
    }

    /// Drop every entry that is past its local deadline.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
