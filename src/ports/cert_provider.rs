use std::path::PathBuf;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

/// Errors raised while resolving transport-security material.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProvisioningError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no PKCS#8 private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("certificate generation failed: {0}")]
    Generate(String),
}

/// Result type alias for certificate provisioning.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// A rustls-ready certificate chain and private key.
pub struct CertifiedMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// CertificateProvider defines the port for resolving TLS material at
/// startup. Implementations either load operator-supplied files or provision
/// their own; selection happens in the TLS bootstrap.
pub trait CertificateProvider: Send + Sync {
    fn provide(&self) -> ProvisioningResult<CertifiedMaterial>;
}
