//! Environment handed to single-host worker processes
//!
//! A worker child learns everything about its one host from these variables.
//! The fleet config reference (`WARDEN_CONFIG`) is never part of the set, so a
//! child cannot fall back into fleet mode.

use crate::schema::{RawActions, RawAuthorityConfig, RawConfig, RawDefaults, RawHost, RawServiceConfig};
use crate::{ConfigError, ConfigResult, FleetConfig, CURRENT_CONFIG_VERSION};
use std::collections::BTreeMap;
use std::path::PathBuf;
use warden_api::HostIdentity;

pub const ENV_HOST: &str = "WARDEN_HOST";
pub const ENV_HOST_NAME: &str = "WARDEN_HOST_NAME";
pub const ENV_LOGIN: &str = "WARDEN_LOGIN";
pub const ENV_PASSWORD: &str = "WARDEN_PASSWORD";
pub const ENV_DATA_DIR: &str = "WARDEN_DATA_DIR";
pub const ENV_CATALOG_PATH: &str = "WARDEN_CATALOG_PATH";
pub const ENV_POLL_IDLE_SECS: &str = "WARDEN_POLL_IDLE_SECS";
pub const ENV_POLL_ACTIVE_SECS: &str = "WARDEN_POLL_ACTIVE_SECS";
pub const ENV_RECONNECT_DELAY_SECS: &str = "WARDEN_RECONNECT_DELAY_SECS";
pub const ENV_ERROR_DELAY_SECS: &str = "WARDEN_ERROR_DELAY_SECS";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "WARDEN_HTTP_TIMEOUT_SECS";
pub const ENV_CREDENTIAL_TTL_SECS: &str = "WARDEN_CREDENTIAL_TTL_SECS";
pub const ENV_CATALOG_REFRESH_SECS: &str = "WARDEN_CATALOG_REFRESH_SECS";
pub const ENV_AUTHORITY_URL: &str = "WARDEN_AUTHORITY_URL";
pub const ENV_PRODUCT_LIST_URL: &str = "WARDEN_PRODUCT_LIST_URL";
pub const ENV_STREAMING: &str = "WARDEN_STREAMING";
pub const ENV_BEFORE_COMMANDS: &str = "WARDEN_BEFORE_COMMANDS";
pub const ENV_AFTER_COMMANDS: &str = "WARDEN_AFTER_COMMANDS";

/// Per-host worker environment
#[derive(Clone, PartialEq)]
pub struct WorkerEnv {
    vars: BTreeMap<String, String>,
}

impl WorkerEnv {
    /// Build the environment for one host of a fleet
    pub fn from_host(config: &FleetConfig, host: &HostIdentity) -> ConfigResult<Self> {
        let mut vars = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            vars.insert(key.to_string(), value);
        };

        set(ENV_HOST, host.address.clone());
        set(ENV_HOST_NAME, host.name.to_string());
        set(ENV_LOGIN, host.login.clone());
        set(ENV_PASSWORD, host.password.clone());

        let service = &config.service;
        set(ENV_DATA_DIR, service.data_dir.display().to_string());
        set(ENV_CATALOG_PATH, service.catalog_path.display().to_string());
        set(
            ENV_POLL_IDLE_SECS,
            service.poll_interval_idle.as_secs_f64().to_string(),
        );
        set(
            ENV_POLL_ACTIVE_SECS,
            service.poll_interval_active.as_secs_f64().to_string(),
        );
        set(
            ENV_RECONNECT_DELAY_SECS,
            service.reconnect_delay.as_secs_f64().to_string(),
        );
        set(ENV_ERROR_DELAY_SECS, service.error_delay.as_secs_f64().to_string());
        set(ENV_HTTP_TIMEOUT_SECS, service.http_timeout.as_secs().to_string());
        set(ENV_CREDENTIAL_TTL_SECS, service.credential_ttl.as_secs().to_string());
        set(ENV_CATALOG_REFRESH_SECS, service.catalog_refresh.as_secs().to_string());
        set(ENV_STREAMING, service.streaming.to_string());

        set(ENV_AUTHORITY_URL, config.authority.base_url.clone());
        if let Some(url) = &config.authority.product_list_url {
            set(ENV_PRODUCT_LIST_URL, url.clone());
        }
        set(ENV_BEFORE_COMMANDS, to_json(&config.actions.before)?);
        set(ENV_AFTER_COMMANDS, to_json(&config.actions.after)?);

        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_vars(self) -> BTreeMap<String, String> {
        self.vars
    }

    /// Resolve a single-host configuration from worker variables.
    ///
    /// Settings not carried in the environment take their usual defaults.
    pub fn config_from_vars<I, K, V>(vars: I) -> ConfigResult<FleetConfig>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let var = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();

        let address = var(ENV_HOST).ok_or_else(|| ConfigError::Env(format!("{} is not set", ENV_HOST)))?;

        let raw = RawConfig {
            config_version: CURRENT_CONFIG_VERSION,
            service: RawServiceConfig {
                data_dir: var(ENV_DATA_DIR).map(PathBuf::from),
                catalog_path: var(ENV_CATALOG_PATH).map(PathBuf::from),
                poll_interval_idle_secs: parse_var(&vars, ENV_POLL_IDLE_SECS)?,
                poll_interval_active_secs: parse_var(&vars, ENV_POLL_ACTIVE_SECS)?,
                reconnect_delay_secs: parse_var(&vars, ENV_RECONNECT_DELAY_SECS)?,
                error_delay_secs: parse_var(&vars, ENV_ERROR_DELAY_SECS)?,
                http_timeout_secs: parse_var(&vars, ENV_HTTP_TIMEOUT_SECS)?,
                credential_ttl_secs: parse_var(&vars, ENV_CREDENTIAL_TTL_SECS)?,
                catalog_refresh_secs: parse_var(&vars, ENV_CATALOG_REFRESH_SECS)?,
                streaming: parse_var(&vars, ENV_STREAMING)?.unwrap_or(false),
            },
            authority: RawAuthorityConfig {
                base_url: var(ENV_AUTHORITY_URL),
                product_list_url: var(ENV_PRODUCT_LIST_URL),
            },
            supervisor: Default::default(),
            defaults: RawDefaults::default(),
            actions: RawActions {
                before: json_var(&vars, ENV_BEFORE_COMMANDS)?,
                after: json_var(&vars, ENV_AFTER_COMMANDS)?,
                ..Default::default()
            },
            hosts: vec![RawHost {
                name: Some(var(ENV_HOST_NAME).unwrap_or_else(|| address.clone())),
                address,
                login: var(ENV_LOGIN),
                password: var(ENV_PASSWORD),
                enabled: true,
            }],
        };

        crate::resolve(raw)
    }
}

// Passwords never end up in logs.
impl std::fmt::Debug for WorkerEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.vars {
            if key == ENV_PASSWORD {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

fn to_json(commands: &[String]) -> ConfigResult<String> {
    serde_json::to_string(commands).map_err(|e| ConfigError::Env(e.to_string()))
}

fn parse_var<T: std::str::FromStr>(
    vars: &BTreeMap<String, String>,
    key: &str,
) -> ConfigResult<Option<T>> {
    match vars.get(key).filter(|v| !v.is_empty()) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env(format!("{} has an invalid value: {}", key, value))),
        None => Ok(None),
    }
}

fn json_var(vars: &BTreeMap<String, String>, key: &str) -> ConfigResult<Vec<String>> {
    match vars.get(key).filter(|v| !v.is_empty()) {
        Some(value) => serde_json::from_str(value)
            .map_err(|e| ConfigError::Env(format!("{} is not a JSON string list: {}", key, e))),
        None => Ok(Vec::new()),
    }
}
