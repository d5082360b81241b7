use std::net::SocketAddr;

use crate::config::models::{GatewayConfig, HealthConfig, TlsConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.shared_secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "shared_secret".to_string(),
            });
        }

        if config.state_path.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "state_path".to_string(),
            });
        }

        if config.proxy.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        errors.extend(Self::validate_health(&config.health));

        if let Err(e) = Self::validate_tls(&config.tls) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8080' or '0.0.0.0:8443')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_health(health: &HealthConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !health.enabled {
            return errors;
        }

        if health.interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health.interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if health.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        } else if health.timeout_secs >= health.interval_secs && health.interval_secs > 0 {
            errors.push(ValidationError::InvalidField {
                field: "health.timeout_secs".to_string(),
                message: "probe timeout must be shorter than the cycle interval".to_string(),
            });
        }

        if health.strikes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health.strikes".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !health.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "health.path".to_string(),
                message: "probe path must start with '/'".to_string(),
            });
        }

        errors
    }

    fn validate_tls(tls: &TlsConfig) -> ValidationResult<()> {
        if !tls.enabled {
            return Ok(());
        }

        match (&tls.cert_path, &tls.key_path) {
            // Both given or neither given are valid: explicit material vs self-provisioning.
            (Some(_), Some(_)) | (None, None) => Ok(()),
            _ => Err(ValidationError::InvalidTls {
                message: "cert_path and key_path must be provided together".to_string(),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let messages: Vec<String> = errors.iter().map(|e| format!("  • {e}")).collect();
        format!(
            "Found {} validation error(s):\n{}",
            errors.len(),
            messages.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GatewayConfig {
        GatewayConfig::builder()
            .listen_addr("127.0.0.1:8080")
            .shared_secret("hunter2")
            .build()
            .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(GatewayConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let mut config = valid_config();
        config.shared_secret = String::new();
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_bad_listen_addr_rejected() {
        let mut config = valid_config();
        config.listen_addr = "not-an-address".to_string();
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("listen address"));
    }

    #[test]
    fn test_tls_requires_paired_material() {
        let mut config = valid_config();
        config.tls.enabled = true;
        config.tls.cert_path = Some("cert.pem".to_string());
        assert!(GatewayConfigValidator::validate(&config).is_err());

        config.tls.key_path = Some("key.pem".to_string());
        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_probe_timeout_must_fit_interval() {
        let mut config = valid_config();
        config.health.timeout_secs = config.health.interval_secs;
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_zero_strikes_rejected() {
        let mut config = valid_config();
        config.health.strikes = 0;
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }
}
