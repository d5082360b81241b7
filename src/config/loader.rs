use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration from a file using the config crate, overlaid with
/// `POSTERN_`-prefixed environment variables (e.g. `POSTERN_SHARED_SECRET`,
/// `POSTERN_TLS__ENABLED`).
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously.
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    // Determine file format based on extension
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Toml,
    };

    let mut builder = Config::builder();
    if path.exists() {
        builder = builder.add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ));
    } else {
        tracing::warn!(
            "Configuration file {} not found; using defaults and environment",
            path.display()
        );
    }

    let settings = builder
        .add_source(
            Environment::with_prefix("POSTERN")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:3000"
shared_secret = "hunter2"
workers = 4

[health]
enabled = true
interval_secs = 15
strikes = 3

[tls]
enabled = true
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.shared_secret, "hunter2");
        assert_eq!(config.workers, 4);
        assert_eq!(config.health.interval_secs, 15);
        assert!(config.tls.enabled);
        assert!(config.tls.cert_path.is_none());
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "listen_addr": "127.0.0.1:3000",
  "shared_secret": "hunter2",
  "proxy": { "timeout_secs": 120 },
  "health": { "enabled": false }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.proxy.timeout_secs, 120);
        assert!(!config.health.enabled);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let config = load_config("/nonexistent/postern.toml").await.unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
    }
}
