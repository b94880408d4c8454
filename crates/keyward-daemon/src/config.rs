//! Daemon configuration.
//!
//! Loaded from the file named by `KEYWARD_CONFIG`, or from
//! `$XDG_CONFIG_HOME/keyward/config.toml`. The file is optional; the two
//! required settings can come from the environment instead, and the
//! environment wins when both are present:
//!
//! - `UPSTREAM_URL`: base URL of the upstream service
//! - `UPSTREAM_ADMIN_TOKEN`: administrator credential used to mint tokens
//!   (`GITLAB_ADMIN_TOKEN` is accepted when it is unset)
//!
//! ## Example Configuration
//!
//! ```toml
//! listen_addr = "0.0.0.0:8443"
//! metrics_addr = "0.0.0.0:9090"
//! upstream_url = "https://gitlab.internal"
//!
//! [tls]
//! ca_cert = "certs/ca.crt"
//! server_cert = "certs/server.crt"
//! server_key = "certs/server.key"
//!
//! [credentials]
//! cache_lifetime_secs = 82800
//! validity_window_secs = 86400
//! issuer_timeout_secs = 5
//! purge_interval_secs = 600
//!
//! [[identities]]
//! claim = "alice"
//! id = 3
//! username = "alice"
//! ```

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use keyward::{Config, IdentityResolver, Principal};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::{DaemonError, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "KEYWARD_CONFIG";
/// Environment variable overriding `upstream_url`.
pub const UPSTREAM_URL_ENV: &str = "UPSTREAM_URL";
/// Environment variable overriding `admin_token`.
pub const ADMIN_TOKEN_ENV: &str = "UPSTREAM_ADMIN_TOKEN";
/// Legacy name for [`ADMIN_TOKEN_ENV`], read only when that is unset.
pub const LEGACY_ADMIN_TOKEN_ENV: &str = "GITLAB_ADMIN_TOKEN";

/// Daemon configuration loaded from TOML and the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Address of the mTLS proxy listener.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Address of the plain-HTTP metrics listener.
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,

    /// Upstream base URL.
    #[serde(default)]
    pub upstream_url: Option<Url>,

    /// Administrator credential. Prefer `UPSTREAM_ADMIN_TOKEN`.
    #[serde(default)]
    pub admin_token: Option<SecretString>,

    #[serde(default)]
    pub tls: TlsSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    /// Verified common name to principal mapping.
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,
}

/// Certificate and key locations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TlsSettings {
    /// CA bundle that client certificates must chain to.
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,

    /// Server certificate chain presented to clients.
    #[serde(default = "default_server_cert")]
    pub server_cert: PathBuf,

    /// Server private key.
    #[serde(default = "default_server_key")]
    pub server_key: PathBuf,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_cert: default_ca_cert(),
            server_cert: default_server_cert(),
            server_key: default_server_key(),
        }
    }
}

/// Credential lifetimes and timeouts, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CredentialSettings {
    /// How long a minted token is reused (default: 82800 = 23 hours).
    #[serde(default = "default_cache_lifetime_secs")]
    pub cache_lifetime_secs: u64,

    /// Validity requested from the upstream (default: 86400 = 24 hours).
    #[serde(default = "default_validity_window_secs")]
    pub validity_window_secs: u64,

    /// Bound on one issuance call (default: 5).
    #[serde(default = "default_issuer_timeout_secs")]
    pub issuer_timeout_secs: u64,

    /// Interval between sweeps of expired cache entries (default: 600).
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            cache_lifetime_secs: default_cache_lifetime_secs(),
            validity_window_secs: default_validity_window_secs(),
            issuer_timeout_secs: default_issuer_timeout_secs(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

/// One row of the identity table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IdentityEntry {
    /// Certificate subject common name.
    pub claim: String,
    /// Upstream user ID.
    pub id: u64,
    /// Upstream username.
    pub username: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            metrics_addr: default_metrics_addr(),
            upstream_url: None,
            admin_token: None,
            tls: TlsSettings::default(),
            credentials: CredentialSettings::default(),
            identities: Vec::new(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8443))
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from("certs/ca.crt")
}

fn default_server_cert() -> PathBuf {
    PathBuf::from("certs/server.crt")
}

fn default_server_key() -> PathBuf {
    PathBuf::from("certs/server.key")
}

const fn default_cache_lifetime_secs() -> u64 {
    82_800 // 23 hours
}

const fn default_validity_window_secs() -> u64 {
    86_400 // 24 hours
}

const fn default_issuer_timeout_secs() -> u64 {
    5
}

const fn default_purge_interval_secs() -> u64 {
    600
}

impl DaemonConfig {
    /// Loads configuration from the file and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `KEYWARD_CONFIG` names a file that does not exist
    /// - The file cannot be read or parsed
    /// - An environment override is malformed
    /// - Validation fails
    pub fn load() -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = explicit.clone().or_else(Self::config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) if explicit.is_some() => {
                return Err(DaemonError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Parses a configuration file without applying the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            DaemonError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Returns the default configuration file path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|dir| dir.join("keyward").join("config.toml"))
    }

    /// Overrides the upstream URL and admin token from `lookup`.
    ///
    /// Empty values are ignored. `GITLAB_ADMIN_TOKEN` is consulted when
    /// `UPSTREAM_ADMIN_TOKEN` is unset or empty.
    ///
    /// # Errors
    ///
    /// Returns an error if `UPSTREAM_URL` is not a valid URL.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(UPSTREAM_URL_ENV).filter(|v| !v.trim().is_empty()) {
            let url = raw.trim().parse::<Url>().map_err(|e| {
                DaemonError::Config(format!("{UPSTREAM_URL_ENV} is not a valid URL: {e}"))
            })?;
            self.upstream_url = Some(url);
        }
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) =
            non_empty(ADMIN_TOKEN_ENV).or_else(|| non_empty(LEGACY_ADMIN_TOKEN_ENV))
        {
            self.admin_token = Some(SecretString::from(token));
        }
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The upstream URL or admin token is missing
    /// - The credential settings are inconsistent
    /// - An identity claim is empty or duplicated
    /// - A username is empty or contains `:`
    pub fn validate(&self) -> Result<()> {
        let core = self.core_config()?;
        core.validate()?;

        if self.credentials.purge_interval_secs == 0 {
            return Err(DaemonError::Config(
                "purge_interval_secs must be non-zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.identities {
            if entry.claim.is_empty() {
                return Err(DaemonError::Config(
                    "Identity claim must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.claim.as_str()) {
                return Err(DaemonError::Config(format!(
                    "Duplicate identity claim '{}'",
                    entry.claim
                )));
            }
            if entry.username.is_empty() || entry.username.contains(':') {
                return Err(DaemonError::Config(format!(
                    "Invalid username '{}' for claim '{}': must be non-empty and contain no ':'",
                    entry.username, entry.claim
                )));
            }
        }

        Ok(())
    }

    /// Builds the credential configuration shared by the issuer and cache.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::ConfigurationMissing`] if the upstream URL or
    /// admin token is absent.
    pub fn core_config(&self) -> Result<Config> {
        let upstream_url = self
            .upstream_url
            .clone()
            .ok_or(DaemonError::ConfigurationMissing(UPSTREAM_URL_ENV))?;
        let admin_token = self
            .admin_token
            .as_ref()
            .filter(|t| !t.expose_secret().trim().is_empty())
            .ok_or(DaemonError::ConfigurationMissing(ADMIN_TOKEN_ENV))?;

        let credentials = &self.credentials;
        Ok(Config::new(upstream_url, admin_token.expose_secret())
            .with_cache_lifetime(Duration::from_secs(credentials.cache_lifetime_secs))
            .with_validity_window(Duration::from_secs(credentials.validity_window_secs))
            .with_issuer_timeout(Duration::from_secs(credentials.issuer_timeout_secs)))
    }

    /// Builds the identity resolver from the `[[identities]]` table.
    #[must_use]
    pub fn resolver(&self) -> IdentityResolver {
        IdentityResolver::new(
            self.identities
                .iter()
                .map(|e| (e.claim.clone(), Principal::new(e.id, e.username.clone()))),
        )
    }

    /// Interval between purges of expired cache entries.
    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.credentials.purge_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn sample_config_toml() -> &'static str {
        r#"
listen_addr = "127.0.0.1:8443"
upstream_url = "https://gitlab.internal"
admin_token = "glpat-from-file"

[tls]
ca_cert = "/etc/keyward/ca.crt"

[credentials]
issuer_timeout_secs = 3

[[identities]]
claim = "jonathanp"
id = 1
username = "root"

[[identities]]
claim = "bob"
id = 1
username = "root"

[[identities]]
claim = "alice"
id = 3
username = "alice"
        "#
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_config() {
        let config: DaemonConfig = toml::from_str(sample_config_toml()).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8443".parse().unwrap());
        assert_eq!(config.metrics_addr, default_metrics_addr());
        assert_eq!(config.tls.ca_cert, PathBuf::from("/etc/keyward/ca.crt"));
        assert_eq!(config.tls.server_cert, PathBuf::from("certs/server.crt"));
        assert_eq!(config.credentials.issuer_timeout_secs, 3);
        assert_eq!(config.credentials.cache_lifetime_secs, 82_800);
        assert_eq!(config.identities.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_core_config() {
        let config: DaemonConfig = toml::from_str(sample_config_toml()).unwrap();
        let core = config.core_config().unwrap();

        assert_eq!(core.upstream_url.as_str(), "https://gitlab.internal/");
        assert_eq!(core.admin_token.expose_secret(), "glpat-from-file");
        assert_eq!(core.issuer_timeout, Duration::from_secs(3));
        assert_eq!(core.cache_lifetime, Duration::from_secs(82_800));
    }

    #[test]
    fn test_resolver_from_identities() {
        let config: DaemonConfig = toml::from_str(sample_config_toml()).unwrap();
        let resolver = config.resolver();

        assert_eq!(resolver.resolve("alice"), Some(Principal::new(3, "alice")));
        assert_eq!(resolver.resolve("bob"), resolver.resolve("jonathanp"));
        assert_eq!(resolver.resolve("unknown-hacker"), None);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: DaemonConfig = toml::from_str(sample_config_toml()).unwrap();
        config
            .apply_env(env(&[
                (UPSTREAM_URL_ENV, "http://gitlab:8080"),
                (ADMIN_TOKEN_ENV, "glpat-from-env"),
            ]))
            .unwrap();

        let core = config.core_config().unwrap();
        assert_eq!(core.upstream_url.as_str(), "http://gitlab:8080/");
        assert_eq!(core.admin_token.expose_secret(), "glpat-from-env");
    }

    #[test]
    fn test_legacy_admin_token_env() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[
                (UPSTREAM_URL_ENV, "https://gitlab.internal"),
                (LEGACY_ADMIN_TOKEN_ENV, "glpat-legacy"),
            ]))
            .unwrap();

        let core = config.core_config().unwrap();
        assert_eq!(core.admin_token.expose_secret(), "glpat-legacy");
    }

    #[test]
    fn test_admin_token_env_wins_over_legacy() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[
                (UPSTREAM_URL_ENV, "https://gitlab.internal"),
                (ADMIN_TOKEN_ENV, "glpat-current"),
                (LEGACY_ADMIN_TOKEN_ENV, "glpat-legacy"),
            ]))
            .unwrap();

        let core = config.core_config().unwrap();
        assert_eq!(core.admin_token.expose_secret(), "glpat-current");
    }

    #[test]
    fn test_empty_env_is_ignored() {
        let mut config: DaemonConfig = toml::from_str(sample_config_toml()).unwrap();
        config.apply_env(env(&[(ADMIN_TOKEN_ENV, "  ")])).unwrap();

        let core = config.core_config().unwrap();
        assert_eq!(core.admin_token.expose_secret(), "glpat-from-file");
    }

    #[test]
    fn test_invalid_env_url() {
        let mut config = DaemonConfig::default();
        let result = config.apply_env(env(&[(UPSTREAM_URL_ENV, "not a url")]));

        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_missing_upstream_url_is_fatal() {
        let mut config = DaemonConfig::default();
        config.apply_env(env(&[(ADMIN_TOKEN_ENV, "glpat")])).unwrap();

        assert!(matches!(
            config.validate(),
            Err(DaemonError::ConfigurationMissing(UPSTREAM_URL_ENV))
        ));
    }

    #[test]
    fn test_missing_admin_token_is_fatal() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[(UPSTREAM_URL_ENV, "https://gitlab.internal")]))
            .unwrap();

        assert!(matches!(
            config.validate(),
            Err(DaemonError::ConfigurationMissing(ADMIN_TOKEN_ENV))
        ));
    }

    #[test]
    fn test_env_only_config() {
        let mut config = DaemonConfig::default();
        config
            .apply_env(env(&[
                (UPSTREAM_URL_ENV, "https://gitlab.internal"),
                (ADMIN_TOKEN_ENV, "glpat"),
            ]))
            .unwrap();

        assert!(config.validate().is_ok());
        assert!(config.resolver().is_empty());
    }

    #[test]
    fn test_validate_cache_outlives_window() {
        let toml = r#"
upstream_url = "https://gitlab.internal"
admin_token = "glpat"

[credentials]
cache_lifetime_secs = 86400
validity_window_secs = 86400
        "#;

        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(DaemonError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_validate_duplicate_claims() {
        let toml = r#"
upstream_url = "https://gitlab.internal"
admin_token = "glpat"

[[identities]]
claim = "alice"
id = 3
username = "alice"

[[identities]]
claim = "alice"
id = 4
username = "alice2"
        "#;

        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_username_with_colon() {
        let toml = r#"
upstream_url = "https://gitlab.internal"
admin_token = "glpat"

[[identities]]
claim = "mallory"
id = 9
username = "root:x"
        "#;

        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_purge_interval() {
        let toml = r#"
upstream_url = "https://gitlab.internal"
admin_token = "glpat"

[credentials]
purge_interval_secs = 0
        "#;

        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_config_toml().as_bytes()).unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.identities.len(), 3);
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"listen_addr = [").unwrap();

        assert!(matches!(
            DaemonConfig::from_file(file.path()),
            Err(DaemonError::Toml(_))
        ));
    }

    #[test]
    fn test_debug_redacts_admin_token() {
        let config: DaemonConfig = toml::from_str(sample_config_toml()).unwrap();
        let debug_str = format!("{config:?}");

        assert!(!debug_str.contains("glpat-from-file"));
    }
}
