//! Certificate provider implementations.
//!
//! Two ways to resolve the TLS material workers terminate with: load an
//! operator-supplied PEM pair, or generate a self-signed pair once and cache
//! it on disk so every boot (and every worker) sees the same certificate.
use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::ports::cert_provider::{
    CertificateProvider, CertifiedMaterial, ProvisioningError, ProvisioningResult,
};

/// Loads certificate material from operator-supplied PEM files.
pub struct FileCertProvider {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl FileCertProvider {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

impl CertificateProvider for FileCertProvider {
    fn provide(&self) -> ProvisioningResult<CertifiedMaterial> {
        load_pem_pair(&self.cert_path, &self.key_path)
    }
}

/// Generates a self-signed certificate once and caches the pair under a
/// directory; later boots load the cache instead of re-generating.
pub struct SelfSignedCertProvider {
    cache_dir: PathBuf,
}

impl SelfSignedCertProvider {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn cert_path(&self) -> PathBuf {
        self.cache_dir.join("self-signed.cert.pem")
    }

    fn key_path(&self) -> PathBuf {
        self.cache_dir.join("self-signed.key.pem")
    }

    fn generate(&self) -> ProvisioningResult<CertifiedMaterial> {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ProvisioningError::Generate(e.to_string()))?;

        let cert_der = certified.cert.der().to_vec();
        let key_der = certified.signing_key.serialize_der();

        // Cache the pair so restarts and respawned workers keep presenting
        // the same certificate. A failed cache write is only logged: we hold
        // valid material in memory either way.
        if let Err(e) = self.write_cache(&certified) {
            tracing::warn!(
                cache_dir = %self.cache_dir.display(),
                "failed to cache self-signed certificate: {e}"
            );
        }

        Ok(CertifiedMaterial {
            cert_chain: vec![CertificateDer::from(cert_der)],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        })
    }

    fn write_cache(
        &self,
        certified: &rcgen::CertifiedKey<rcgen::KeyPair>,
    ) -> ProvisioningResult<()> {
        fs::create_dir_all(&self.cache_dir).map_err(|source| ProvisioningError::Write {
            path: self.cache_dir.clone(),
            source,
        })?;
        fs::write(self.cert_path(), certified.cert.pem()).map_err(|source| {
            ProvisioningError::Write {
                path: self.cert_path(),
                source,
            }
        })?;
        fs::write(self.key_path(), certified.signing_key.serialize_pem()).map_err(|source| {
            ProvisioningError::Write {
                path: self.key_path(),
                source,
            }
        })?;
        Ok(())
    }
}

impl CertificateProvider for SelfSignedCertProvider {
    fn provide(&self) -> ProvisioningResult<CertifiedMaterial> {
        if self.cert_path().exists() && self.key_path().exists() {
            tracing::info!(
                cache_dir = %self.cache_dir.display(),
                "loading cached self-signed certificate"
            );
            return load_pem_pair(&self.cert_path(), &self.key_path());
        }

        tracing::info!(
            cache_dir = %self.cache_dir.display(),
            "generating self-signed certificate"
        );
        self.generate()
    }
}

/// Parse a PEM certificate chain and PKCS#8 private key from disk.
fn load_pem_pair(cert_path: &Path, key_path: &Path) -> ProvisioningResult<CertifiedMaterial> {
    let cert_file = fs::File::open(cert_path).map_err(|source| ProvisioningError::Read {
        path: cert_path.to_path_buf(),
        source,
    })?;
    let cert_chain: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ProvisioningError::Read {
                path: cert_path.to_path_buf(),
                source,
            })?;
    if cert_chain.is_empty() {
        return Err(ProvisioningError::NoCertificates(cert_path.to_path_buf()));
    }

    let key_file = fs::File::open(key_path).map_err(|source| ProvisioningError::Read {
        path: key_path.to_path_buf(),
        source,
    })?;
    let key = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(key_file))
        .next()
        .transpose()
        .map_err(|source| ProvisioningError::Read {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ProvisioningError::NoPrivateKey(key_path.to_path_buf()))?;

    Ok(CertifiedMaterial {
        cert_chain,
        key: PrivateKeyDer::Pkcs8(key),
    })
}
