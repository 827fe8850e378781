//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{Config, SigningRequest};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    for (i, request) in config.requests().iter().enumerate() {
        let field = format!("steps[{i}]");
        validate_request_at(request, &field)?;
        if !config.credentials.contains_key(request.key_store_id.trim()) {
            return Err(ConfigError::InvalidValue {
                field: format!("{field}.key_store_id"),
                message: format!("unknown credential '{}'", request.key_store_id),
            }
            .into());
        }
    }
    validate_credentials(config)?;
    debug!("configuration validation passed");
    Ok(())
}

/// Validate a single signing request, e.g. one assembled from CLI flags
pub fn validate_request(request: &SigningRequest) -> Result<()> {
    validate_request_at(request, "request")
}

fn validate_request_at(request: &SigningRequest, field: &str) -> Result<()> {
    if request.key_store_id.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: format!("{field}.key_store_id"),
            message: "key store id cannot be empty".to_string(),
        }
        .into());
    }

    if request.globs().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: format!("{field}.apks_to_sign"),
            message: "must name at least one glob".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_credentials(config: &Config) -> Result<()> {
    if !config.credentials.is_empty() {
        debug!(count = config.credentials.len(), "validating credentials");
    }
    for (id, credential) in &config.credentials {
        if id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "credentials".to_string(),
                message: "credential id cannot be empty".to_string(),
            }
            .into());
        }

        if credential.keystore.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("credentials.{id}.keystore"),
                message: "keystore path cannot be empty".to_string(),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialConfig, KeyStoreFormat, StepConfig};
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_glob_list() {
        let mut config = Config::default();
        config
            .steps
            .push(StepConfig::Single(SigningRequest::new("release", " , ,")));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("steps[0].apks_to_sign"));
    }

    #[test]
    fn test_validate_blank_key_store_id() {
        assert!(validate_request(&SigningRequest::new("  ", "*.apk")).is_err());
        assert!(validate_request(&SigningRequest::new("release", "*.apk")).is_ok());
    }

    #[test]
    fn test_validate_unknown_credential() {
        let mut config = Config::default();
        config
            .steps
            .push(StepConfig::Single(SigningRequest::new("release", "*.apk")));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown credential 'release'"));

        config.credentials.insert("release".to_string(), credential("keys/release.p12"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_keystore_path() {
        let mut config = Config::default();
        config.credentials.insert("release".to_string(), credential(""));
        assert!(validate_config(&config).is_err());
    }

    fn credential(keystore: &str) -> CredentialConfig {
        CredentialConfig {
            keystore: PathBuf::from(keystore),
            format: KeyStoreFormat::Pkcs12,
            password: None,
            password_env: None,
            description: None,
        }
    }
}
