//! TLS support for broker connections
//!
//! Loads the client certificate, private key and CA bundle used for mutual
//! TLS. The material is checked up front so a bad file fails at connect time
//! rather than inside the broker client's first handshake.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::error::KcliError;
use crate::Result;

/// Certificate material locations for mutual TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// Client certificate chain (PEM)
    pub cert_path: String,
    /// Client private key (PEM, PKCS#8, PKCS#1 or SEC1)
    pub key_path: String,
    /// CA bundle used to verify the broker (PEM)
    pub ca_cert_path: String,
}

impl TlsFiles {
    pub fn new<P: Into<String>>(cert_path: P, key_path: P, ca_cert_path: P) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: ca_cert_path.into(),
        }
    }

    /// Paths from a security config, only when all three are present
    pub fn from_security(security: &SecurityConfig) -> Option<Self> {
        match (&security.cert_file, &security.key_file, &security.ca_cert_file) {
            (Some(cert), Some(key), Some(ca)) => Some(Self::new(cert, key, ca)),
            _ => None,
        }
    }
}

/// PEM text for mutual TLS, handed to the broker client as-is
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &format_args!("{} bytes", self.ca_pem.len()))
            .finish()
    }
}

/// Read the certificate chain, key and CA bundle, rejecting material a TLS
/// client could not use
pub fn load_material(files: &TlsFiles) -> Result<TlsMaterial> {
    info!(
        "Initializing TLS with cert: {}, key: {}, ca: {}",
        files.cert_path, files.key_path, files.ca_cert_path
    );

    let material = TlsMaterial {
        cert_pem: std::fs::read_to_string(&files.cert_path)?,
        key_pem: std::fs::read_to_string(&files.key_path)?,
        ca_pem: std::fs::read_to_string(&files.ca_cert_path)?,
    };
    client_config(&material, files)?;
    Ok(material)
}

/// A rustls configuration presenting the client certificate and trusting
/// only the given CA bundle; building it proves the key matches the chain
fn client_config(material: &TlsMaterial, files: &TlsFiles) -> Result<Arc<ClientConfig>> {
    let chain = parse_certs(&material.cert_pem, &files.cert_path)?;
    if chain.is_empty() {
        return Err(KcliError::tls_config(format!(
            "no certificates found in {}",
            files.cert_path
        )));
    }

    let key = parse_private_key(&material.key_pem, &files.key_path)?;

    let ca_certs = parse_certs(&material.ca_pem, &files.ca_cert_path)?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(ca_certs);
    if ignored > 0 {
        debug!("Skipped {} unparseable CA certificates", ignored);
    }
    if added == 0 {
        return Err(KcliError::tls_config(format!(
            "no usable CA certificates in {}",
            files.ca_cert_path
        )));
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)?;

    Ok(Arc::new(config))
}

fn parse_certs(pem: &str, path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = certs(&mut BufReader::new(pem.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| KcliError::tls_config(format!("failed to parse {}: {}", path, e)))?;

    debug!("Loaded {} certificates from {}", certs.len(), path);
    Ok(certs)
}

/// First private key in the PEM text
fn parse_private_key(pem: &str, path: &str) -> Result<PrivateKeyDer<'static>> {
    let mut keys: Vec<PrivateKeyDer<'static>> = pkcs8_private_keys(&mut BufReader::new(pem.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| KcliError::tls_config(format!("failed to parse {}: {}", path, e)))?
        .into_iter()
        .map(|k| k.into())
        .collect();

    if !keys.is_empty() {
        debug!("Loaded PKCS8 private key from {}", path);
        return Ok(keys.remove(0));
    }

    // Fall back to PKCS#1 / SEC1 keys
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_bytes()))
        .map_err(|e| KcliError::tls_config(format!("failed to parse {}: {}", path, e)))?
        .ok_or_else(|| KcliError::tls_config(format!("no private keys found in {}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn fixture_files() -> TlsFiles {
        TlsFiles::new(fixture("client.pem"), fixture("client.key"), fixture("ca.pem"))
    }

    #[test]
    fn test_tls_files_require_all_paths() {
        let complete = SecurityConfig::default().certificates("c.pem", "k.pem", "ca.pem");
        assert_eq!(
            TlsFiles::from_security(&complete),
            Some(TlsFiles::new("c.pem", "k.pem", "ca.pem"))
        );

        let mut partial = complete.clone();
        partial.key_file = None;
        assert_eq!(TlsFiles::from_security(&partial), None);
        assert_eq!(TlsFiles::from_security(&SecurityConfig::default()), None);
    }

    #[test]
    fn test_load_material() {
        let material = load_material(&fixture_files()).unwrap();
        assert!(material.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(material.key_pem.contains("PRIVATE KEY"));
        assert!(material.ca_pem.contains("BEGIN CERTIFICATE"));
        assert!(!format!("{:?}", material).contains("PRIVATE KEY"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut files = fixture_files();
        files.ca_cert_path = fixture("does-not-exist.pem");

        assert!(matches!(load_material(&files), Err(KcliError::Io(_))));
    }

    #[test]
    fn test_empty_pem_files_are_rejected() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, "not a certificate\n").unwrap();
        let empty = empty.to_string_lossy().to_string();

        let mut files = fixture_files();
        files.cert_path = empty.clone();
        let err = load_material(&files).unwrap_err();
        assert!(err.to_string().contains("no certificates"));

        let mut files = fixture_files();
        files.key_path = empty.clone();
        let err = load_material(&files).unwrap_err();
        assert!(err.to_string().contains("no private keys"));

        let mut files = fixture_files();
        files.ca_cert_path = empty;
        let err = load_material(&files).unwrap_err();
        assert!(err.to_string().contains("no usable CA"));
    }
}
