//! Default paths for warden components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/warden/config.toml` or `~/.config/warden/config.toml`
//! - Data: `$XDG_DATA_HOME/warden` or `~/.local/share/warden`

use std::path::PathBuf;

/// Environment variable pointing at the fleet configuration file.
///
/// Single-host worker processes must never see this variable.
pub const WARDEN_CONFIG_ENV: &str = "WARDEN_CONFIG";

/// Environment variable for overriding the data directory
pub const WARDEN_DATA_DIR_ENV: &str = "WARDEN_DATA_DIR";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Classification catalog filename within the data directory
const CATALOG_FILENAME: &str = "products.json";

/// Application subdirectory name
const APP_DIR: &str = "warden";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/warden/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/warden/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$WARDEN_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/warden` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/warden` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(WARDEN_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking WARDEN_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Default location of the persisted classification catalog inside a data dir
pub fn catalog_path_in(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(CATALOG_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_warden() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("warden"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn data_dir_contains_warden() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("warden"));
    }

    #[test]
    fn catalog_lives_in_data_dir() {
        let dir = PathBuf::from("/var/lib/warden");
        assert_eq!(catalog_path_in(&dir), dir.join("products.json"));
    }
}
