//! Mutual TLS termination.
//!
//! Client certificates are required and must chain to the configured CA.
//! Handshakes that fail verification never produce a connection, so the
//! proxy only ever sees requests from verified clients. The subject common
//! name of the verified leaf becomes the request's [`IdentityAssertion`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use keyward::IdentityAssertion;
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConfig, ServerConnection, WebPkiClientVerifier};
use tracing::debug;

use crate::config::TlsSettings;
use crate::error::{DaemonError, Result};

/// ALPN protocols offered to clients.
const ALPN_PROTOCOLS: &[&[u8]] = &[b"h2", b"http/1.1"];

/// Builds the server configuration from the PEM files named in `settings`.
///
/// # Errors
///
/// Returns an error if a file cannot be read, contains no usable
/// certificate or key, or the material is rejected by rustls.
pub fn load_server_config(settings: &TlsSettings) -> Result<Arc<ServerConfig>> {
    let ca = load_certs(&settings.ca_cert)?;
    let chain = load_certs(&settings.server_cert)?;
    let key = load_private_key(&settings.server_key)?;
    server_config(ca, chain, key)
}

/// Builds a server configuration that requires client certificates signed
/// by one of `ca`.
///
/// # Errors
///
/// Returns an error if a CA certificate is invalid or the server
/// certificate and key do not match.
pub fn server_config(
    ca: Vec<CertificateDer<'static>>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for cert in ca {
        roots
            .add(cert)
            .map_err(|e| DaemonError::Tls(format!("Invalid CA certificate: {e}")))?;
    }

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| DaemonError::Tls(format!("Failed to build client verifier: {e}")))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)?;
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

/// Reads every certificate from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no certificates.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DaemonError::Tls(format!("Failed to parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(DaemonError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Reads the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| DaemonError::Tls(format!("Failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| DaemonError::Tls(format!("No private key found in {}", path.display())))
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| DaemonError::Tls(format!("Failed to open {}: {e}", path.display())))
}

/// Extracts the identity of a verified client from a finished handshake.
///
/// Returns `None` if no certificate was presented or the leaf has no
/// subject common name.
#[must_use]
pub fn peer_identity(connection: &ServerConnection) -> Option<IdentityAssertion> {
    let leaf = connection.peer_certificates()?.first()?;
    let identity = common_name(leaf).map(IdentityAssertion::new);
    if identity.is_none() {
        debug!("Client certificate has no subject common name");
    }
    identity
}

/// Returns the first subject common name of a DER certificate.
#[must_use]
pub fn common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).ok()?;
    let cn = parsed.subject().iter_common_name().next()?;
    cn.as_str().ok().map(ToString::to_string)
}
