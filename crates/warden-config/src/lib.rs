//! Configuration parsing and validation for wardend
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Host definitions with default credentials
//! - Polling, supervisor and action settings
//! - Validation with clear error messages
//! - Atomic write-back for runtime host changes
//! - The per-host environment contract for worker processes

mod env;
mod policy;
mod schema;
mod validation;

pub use env::*;
pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid worker environment: {0}")]
    Env(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<FleetConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<FleetConfig> {
    let raw: RawConfig = toml::from_str(content)?;
    resolve(raw)
}

/// Check version, validate and resolve defaults
pub(crate) fn resolve(raw: RawConfig) -> ConfigResult<FleetConfig> {
    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(FleetConfig::from_raw(raw))
}

/// Write the configuration back to disk atomically
pub fn save_config(path: impl AsRef<Path>, config: &FleetConfig) -> ConfigResult<()> {
    let path = path.as_ref();
    let content = toml::to_string_pretty(&config.to_raw())?;
    warden_util::write_atomic(path, content.as_bytes())?;
    info!(path = %path.display(), hosts = config.hosts.len(), "Configuration saved");
    Ok(())
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1

            [[hosts]]
            address = "192.168.0.10"
            login = "admin"
        "#;

        let fleet = parse_config(config).unwrap();
        assert_eq!(fleet.hosts.len(), 1);
        assert_eq!(fleet.hosts[0].identity.name.as_str(), "PC-01");
    }

    #[test]
    fn reject_wrong_version() {
        let config = r#"
            config_version = 99
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_hosts() {
        let config = r#"
            config_version = 1

            [defaults]
            login = "admin"

            [[hosts]]
            address = "10.0.0.1"

            [[hosts]]
            address = "10.0.0.1"
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn save_then_load_preserves_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = parse_config(
            r#"
            config_version = 1

            [defaults]
            login = "admin"
            password = "secret"

            [[hosts]]
            name = "PC-01"
            address = "192.168.0.10"

            [[hosts]]
            name = "PC-02"
            address = "192.168.0.11"
            enabled = false
        "#,
        )
        .unwrap();

        save_config(&path, &config).unwrap();
        let reloaded = load_config(&path).unwrap();

        assert_eq!(reloaded.hosts.len(), 2);
        assert_eq!(reloaded.hosts[0].identity, config.hosts[0].identity);
        assert!(!reloaded.hosts[1].enabled);
        assert_eq!(reloaded.service.catalog_path, config.service.catalog_path);
    }

    #[test]
    fn save_to_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = parse_config("config_version = 1").unwrap();
        let result = save_config(blocker.join("config.toml"), &config);
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
