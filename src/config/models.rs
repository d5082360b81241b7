//! Configuration data structures for Postern.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! can be overridden through `POSTERN_`-prefixed environment variables. They
//! are intentionally serde-friendly and include defaults so that minimal
//! configs remain concise.
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on, e.g. "0.0.0.0:8443".
    pub listen_addr: String,
    /// Shared secret required on the registration and control endpoints.
    pub shared_secret: String,
    /// Number of worker router tasks. 0 means one per available core.
    pub workers: usize,
    /// Path of the canonical registry state file.
    pub state_path: String,
    /// Health checking configuration.
    pub health: HealthConfig,
    /// Upstream proxying configuration.
    pub proxy: ProxyConfig,
    /// Transport security configuration.
    pub tls: TlsConfig,
    /// Seconds a worker may spend draining in-flight connections on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            shared_secret: String::new(),
            workers: 0,
            state_path: "registry.json".to_string(),
            health: HealthConfig::default(),
            proxy: ProxyConfig::default(),
            tls: TlsConfig::default(),
            shutdown_grace_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Create a new gateway configuration builder.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Resolve the effective worker count (0 means auto-detect).
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Health checking configuration for registered targets.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    /// Seconds between probe cycles.
    pub interval_secs: u64,
    /// Per-probe timeout, independent of the cycle interval.
    pub timeout_secs: u64,
    /// Path probed on every target instance.
    pub path: String,
    /// Consecutive failed probes before a target is removed.
    pub strikes: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
            strikes: 3,
        }
    }
}

/// Upstream proxying configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream response timeout in seconds. Deliberately long so that
    /// long-lived streaming responses and tunnels survive.
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { timeout_secs: 3600 }
    }
}

/// Transport security configuration.
///
/// With `enabled = true` and no cert/key paths the gateway provisions a
/// self-signed pair, caching it under `cache_dir`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// Path to a PEM encoded certificate chain (explicit material mode).
    pub cert_path: Option<String>,
    /// Path to a PEM encoded PKCS#8 private key (explicit material mode).
    pub key_path: Option<String>,
    /// Directory where self-provisioned certificates are cached.
    pub cache_dir: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: None,
            key_path: None,
            cache_dir: "certs".to_string(),
        }
    }
}

/// Builder for [`GatewayConfig`] to allow for cleaner configuration creation.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    listen_addr: Option<String>,
    shared_secret: Option<String>,
    workers: Option<usize>,
    state_path: Option<String>,
    health: Option<HealthConfig>,
    proxy: Option<ProxyConfig>,
    tls: Option<TlsConfig>,
}

impl GatewayConfigBuilder {
    /// Set the listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the shared control-plane secret.
    pub fn shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    /// Set the worker count explicitly.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the registry state file path.
    pub fn state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Set health checking configuration.
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = Some(health);
        self
    }

    /// Set proxying configuration.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Enable TLS with explicit certificate material.
    pub fn tls(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.tls = Some(TlsConfig {
            enabled: true,
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            cache_dir: TlsConfig::default().cache_dir,
        });
        self
    }

    /// Enable TLS with self-provisioned material cached in `cache_dir`.
    pub fn tls_self_signed(mut self, cache_dir: impl Into<String>) -> Self {
        self.tls = Some(TlsConfig {
            enabled: true,
            cert_path: None,
            key_path: None,
            cache_dir: cache_dir.into(),
        });
        self
    }

    /// Build the final [`GatewayConfig`].
    pub fn build(self) -> Result<GatewayConfig, String> {
        let listen_addr = self
            .listen_addr
            .ok_or_else(|| "listen_addr is required".to_string())?;
        let shared_secret = self
            .shared_secret
            .ok_or_else(|| "shared_secret is required".to_string())?;

        let defaults = GatewayConfig::default();
        Ok(GatewayConfig {
            listen_addr,
            shared_secret,
            workers: self.workers.unwrap_or(defaults.workers),
            state_path: self.state_path.unwrap_or(defaults.state_path),
            health: self.health.unwrap_or_default(),
            proxy: self.proxy.unwrap_or_default(),
            tls: self.tls.unwrap_or_default(),
            shutdown_grace_secs: defaults.shutdown_grace_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let config = GatewayConfig::default();
        assert_eq!(config.health.strikes, 3);
        assert_eq!(config.proxy.timeout_secs, 3600);
        assert!(!config.tls.enabled);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_builder_requires_secret() {
        let result = GatewayConfig::builder().listen_addr("127.0.0.1:0").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_self_signed_tls() {
        let config = GatewayConfig::builder()
            .listen_addr("127.0.0.1:8443")
            .shared_secret("s3cret")
            .tls_self_signed("/tmp/postern-certs")
            .build()
            .unwrap();
        assert!(config.tls.enabled);
        assert!(config.tls.cert_path.is_none());
        assert_eq!(config.tls.cache_dir, "/tmp/postern-certs");
    }
}
