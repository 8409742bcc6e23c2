//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-wide polling and storage settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Session authority endpoints
    #[serde(default)]
    pub authority: RawAuthorityConfig,

    /// Process supervisor settings
    #[serde(default)]
    pub supervisor: RawSupervisorConfig,

    /// Credentials applied to hosts that do not set their own
    #[serde(default)]
    pub defaults: RawDefaults,

    /// Remote commands run by the Before/After actions and diagnostics
    #[serde(default)]
    pub actions: RawActions,

    /// Managed hosts
    #[serde(default)]
    pub hosts: Vec<RawHost>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory (catalog lives here unless `catalog_path` is set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Explicit classification catalog file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,

    /// Poll interval while waiting for a new session (default 5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_idle_secs: Option<f64>,

    /// Poll interval while a session is active (default 3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_active_secs: Option<f64>,

    /// Delay before reconnecting to an unreachable host (default 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_secs: Option<f64>,

    /// Delay after an unexpected cycle failure (default 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_delay_secs: Option<f64>,

    /// Total timeout for authority HTTP requests (default 15)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_timeout_secs: Option<u64>,

    /// Lifetime of cached credentials and in-memory classifications (default 60)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_ttl_secs: Option<u64>,

    /// Catalog refresh period (default 86400)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_refresh_secs: Option<u64>,

    /// Passed to the After action
    #[serde(default)]
    pub streaming: bool,
}

/// Session authority endpoints
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAuthorityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Full product list endpoint; catalog bulk refresh is skipped without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_list_url: Option<String>,
}

/// Process supervisor settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSupervisorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_delay_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_concurrency: Option<usize>,
}

/// Default host credentials
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Remote command lists
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawActions {
    /// Run when a desktop session is detected
    #[serde(default)]
    pub before: Vec<String>,

    /// Run after the session ends or the host needs a reboot
    #[serde(default)]
    pub after: Vec<String>,

    /// Seconds to wait before running the after commands (default 5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_delay_secs: Option<u64>,

    /// Read-only command reporting disk protection status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_status: Option<String>,

    /// Read-only commands that exit 0 when a restriction is in place
    #[serde(default)]
    pub restriction_checks: Vec<String>,
}

/// Raw host definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawHost {
    /// Display name (defaults to PC-NN by position)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Network address
    pub address: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_enabled", skip_serializing_if = "is_true")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}
