//! TLS bootstrap.
//!
//! Runs once, before workers are spawned. Resolves the certificate material
//! workers terminate with, according to the configuration:
//!
//! * TLS disabled: workers listen in plaintext.
//! * Explicit cert/key paths: load the operator-supplied PEM pair.
//! * Enabled without material: provision a self-signed pair, cached on disk.
//! * Any load or generation failure: log it and fall back to plaintext
//!   rather than refusing to start.
use std::sync::Arc;

use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::{
    adapters::cert_provider::{FileCertProvider, SelfSignedCertProvider},
    config::TlsConfig,
    ports::cert_provider::{CertificateProvider, CertifiedMaterial},
};

/// Resolve the TLS acceptor workers will use, or `None` for plaintext.
pub fn bootstrap(config: &TlsConfig) -> Option<TlsAcceptor> {
    if !config.enabled {
        tracing::info!("TLS disabled; workers will listen in plaintext");
        return None;
    }

    let provider: Box<dyn CertificateProvider> = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => {
            tracing::info!(cert_path = %cert, key_path = %key, "loading TLS material from disk");
            Box::new(FileCertProvider::new(cert, key))
        }
        _ => Box::new(SelfSignedCertProvider::new(&config.cache_dir)),
    };

    let material = match provider.provide() {
        Ok(material) => material,
        Err(e) => {
            tracing::error!("TLS provisioning failed, falling back to plaintext: {e}");
            return None;
        }
    };

    match build_server_config(material) {
        Ok(server_config) => Some(TlsAcceptor::from(Arc::new(server_config))),
        Err(e) => {
            tracing::error!("invalid TLS material, falling back to plaintext: {e}");
            None
        }
    }
}

fn build_server_config(material: CertifiedMaterial) -> Result<ServerConfig, rustls::Error> {
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(material.cert_chain, material.key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[test]
    fn test_disabled_tls_is_plaintext() {
        let config = TlsConfig::default();
        assert!(bootstrap(&config).is_none());
    }

    #[test]
    fn test_self_provisioning_produces_acceptor() {
        install_crypto_provider();
        let dir = tempdir().unwrap();
        let config = TlsConfig {
            enabled: true,
            cert_path: None,
            key_path: None,
            cache_dir: dir.path().to_string_lossy().into_owned(),
        };
        assert!(bootstrap(&config).is_some());
        // The pair must have been cached for the next boot.
        assert!(dir.path().join("self-signed.cert.pem").exists());
    }

    #[test]
    fn test_missing_material_falls_back_to_plaintext() {
        install_crypto_provider();
        let config = TlsConfig {
            enabled: true,
            cert_path: Some("/nonexistent/cert.pem".to_string()),
            key_path: Some("/nonexistent/key.pem".to_string()),
            cache_dir: "certs".to_string(),
        };
        // Never refuses to start: degraded transport beats no gateway.
        assert!(bootstrap(&config).is_none());
    }
}
