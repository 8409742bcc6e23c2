//! Validated fleet configuration

use crate::schema::{
    RawActions, RawAuthorityConfig, RawConfig, RawDefaults, RawHost, RawServiceConfig,
    RawSupervisorConfig,
};
use crate::validation::host_display_name;
use crate::CURRENT_CONFIG_VERSION;
use std::path::PathBuf;
use std::time::Duration;
use warden_api::HostIdentity;
use warden_util::{HostName, catalog_path_in, default_data_dir};

/// Default session authority base URL
pub const DEFAULT_AUTHORITY_URL: &str = "https://services.drova.io";

/// Validated configuration ready for use by the core
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub service: ServiceConfig,
    pub authority: AuthorityConfig,
    pub supervisor: SupervisorConfig,
    pub defaults: CredentialDefaults,
    pub actions: ActionsConfig,
    pub hosts: Vec<HostEntry>,
}

impl FleetConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let defaults = CredentialDefaults::from_raw(raw.defaults);
        let hosts = raw
            .hosts
            .into_iter()
            .enumerate()
            .map(|(index, host)| HostEntry::from_raw(host, index, &defaults))
            .collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            authority: AuthorityConfig::from_raw(raw.authority),
            supervisor: SupervisorConfig::from_raw(raw.supervisor),
            defaults,
            actions: ActionsConfig::from_raw(raw.actions),
            hosts,
        }
    }

    /// Convert back to the on-disk shape.
    ///
    /// Per-host credentials equal to the defaults are left out.
    pub fn to_raw(&self) -> RawConfig {
        RawConfig {
            config_version: CURRENT_CONFIG_VERSION,
            service: self.service.to_raw(),
            authority: RawAuthorityConfig {
                base_url: Some(self.authority.base_url.clone()),
                product_list_url: self.authority.product_list_url.clone(),
            },
            supervisor: RawSupervisorConfig {
                monitor_interval_secs: Some(self.supervisor.monitor_interval.as_secs()),
                restart_delay_secs: Some(self.supervisor.restart_delay.as_secs()),
                stop_timeout_secs: Some(self.supervisor.stop_timeout.as_secs()),
                probe_interval_secs: Some(self.supervisor.probe_interval.as_secs()),
                probe_concurrency: Some(self.supervisor.probe_concurrency),
            },
            defaults: RawDefaults {
                login: self.defaults.login.clone(),
                password: self.defaults.password.clone(),
            },
            actions: RawActions {
                before: self.actions.before.clone(),
                after: self.actions.after.clone(),
                after_delay_secs: Some(self.actions.after_delay.as_secs()),
                protection_status: self.actions.protection_status.clone(),
                restriction_checks: self.actions.restriction_checks.clone(),
            },
            hosts: self.hosts.iter().map(|h| h.to_raw(&self.defaults)).collect(),
        }
    }

    /// Get a host by name
    pub fn host(&self, name: &HostName) -> Option<&HostEntry> {
        self.hosts.iter().find(|h| &h.identity.name == name)
    }

    /// Hosts that should have a running worker
    pub fn enabled_hosts(&self) -> impl Iterator<Item = &HostIdentity> {
        self.hosts.iter().filter(|h| h.enabled).map(|h| &h.identity)
    }
}

/// Service-wide settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub poll_interval_idle: Duration,
    pub poll_interval_active: Duration,
    pub reconnect_delay: Duration,
    pub error_delay: Duration,
    pub http_timeout: Duration,
    pub credential_ttl: Duration,
    pub catalog_refresh: Duration,
    pub streaming: bool,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let data_dir = raw.data_dir.unwrap_or_else(default_data_dir);
        let catalog_path = raw
            .catalog_path
            .unwrap_or_else(|| catalog_path_in(&data_dir));

        Self {
            data_dir,
            catalog_path,
            poll_interval_idle: secs_f64_or(raw.poll_interval_idle_secs, 5.0),
            poll_interval_active: secs_f64_or(raw.poll_interval_active_secs, 3.0),
            reconnect_delay: secs_f64_or(raw.reconnect_delay_secs, 1.0),
            error_delay: secs_f64_or(raw.error_delay_secs, 1.0),
            http_timeout: Duration::from_secs(raw.http_timeout_secs.unwrap_or(15)),
            credential_ttl: Duration::from_secs(raw.credential_ttl_secs.unwrap_or(60)),
            catalog_refresh: Duration::from_secs(raw.catalog_refresh_secs.unwrap_or(86_400)),
            streaming: raw.streaming,
        }
    }

    fn to_raw(&self) -> RawServiceConfig {
        let catalog_path = (self.catalog_path != catalog_path_in(&self.data_dir))
            .then(|| self.catalog_path.clone());

        RawServiceConfig {
            data_dir: Some(self.data_dir.clone()),
            catalog_path,
            poll_interval_idle_secs: Some(self.poll_interval_idle.as_secs_f64()),
            poll_interval_active_secs: Some(self.poll_interval_active.as_secs_f64()),
            reconnect_delay_secs: Some(self.reconnect_delay.as_secs_f64()),
            error_delay_secs: Some(self.error_delay.as_secs_f64()),
            http_timeout_secs: Some(self.http_timeout.as_secs()),
            credential_ttl_secs: Some(self.credential_ttl.as_secs()),
            catalog_refresh_secs: Some(self.catalog_refresh.as_secs()),
            streaming: self.streaming,
        }
    }
}

/// Session authority endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorityConfig {
    pub base_url: String,
    pub product_list_url: Option<String>,
}

impl AuthorityConfig {
    fn from_raw(raw: RawAuthorityConfig) -> Self {
        Self {
            base_url: raw
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_AUTHORITY_URL.to_string()),
            product_list_url: raw.product_list_url,
        }
    }
}

/// Process supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub monitor_interval: Duration,
    pub restart_delay: Duration,
    pub stop_timeout: Duration,
    pub probe_interval: Duration,
    pub probe_concurrency: usize,
}

impl SupervisorConfig {
    fn from_raw(raw: RawSupervisorConfig) -> Self {
        Self {
            monitor_interval: Duration::from_secs(raw.monitor_interval_secs.unwrap_or(10)),
            restart_delay: Duration::from_secs(raw.restart_delay_secs.unwrap_or(5)),
            stop_timeout: Duration::from_secs(raw.stop_timeout_secs.unwrap_or(5)),
            probe_interval: Duration::from_secs(raw.probe_interval_secs.unwrap_or(60)),
            probe_concurrency: raw.probe_concurrency.unwrap_or(4),
        }
    }
}

/// Credentials used by hosts that do not set their own
#[derive(Debug, Clone, Default)]
pub struct CredentialDefaults {
    pub login: Option<String>,
    pub password: Option<String>,
}

impl CredentialDefaults {
    fn from_raw(raw: RawDefaults) -> Self {
        Self {
            login: raw.login,
            password: raw.password,
        }
    }
}

/// Remote commands for the Before/After actions and diagnostics
#[derive(Debug, Clone, Default)]
pub struct ActionsConfig {
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub after_delay: Duration,
    pub protection_status: Option<String>,
    pub restriction_checks: Vec<String>,
}

impl ActionsConfig {
    fn from_raw(raw: RawActions) -> Self {
        Self {
            before: raw.before,
            after: raw.after,
            after_delay: Duration::from_secs(raw.after_delay_secs.unwrap_or(5)),
            protection_status: raw.protection_status,
            restriction_checks: raw.restriction_checks,
        }
    }
}

/// One configured host
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub identity: HostIdentity,
    pub enabled: bool,
}

impl HostEntry {
    fn from_raw(raw: RawHost, index: usize, defaults: &CredentialDefaults) -> Self {
        let name = host_display_name(&raw, index);
        let login = raw
            .login
            .or_else(|| defaults.login.clone())
            .unwrap_or_default();
        let password = raw
            .password
            .or_else(|| defaults.password.clone())
            .unwrap_or_default();

        Self {
            identity: HostIdentity::new(name, raw.address.trim(), login, password),
            enabled: raw.enabled,
        }
    }

    fn to_raw(&self, defaults: &CredentialDefaults) -> RawHost {
        let id = &self.identity;
        let login = (defaults.login.as_deref() != Some(id.login.as_str())).then(|| id.login.clone());
        let password = (defaults.password.as_deref().unwrap_or_default() != id.password)
            .then(|| id.password.clone());

        RawHost {
            name: Some(id.name.to_string()),
            address: id.address.clone(),
            login,
            password,
            enabled: self.enabled,
        }
    }
}

fn secs_f64_or(value: Option<f64>, default: f64) -> Duration {
    value
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_config;

    const CONFIG: &str = r#"
        config_version = 1

        [service]
        data_dir = "/var/lib/warden"
        poll_interval_idle_secs = 2.5

        [defaults]
        login = "admin"
        password = "secret"

        [[hosts]]
        address = "192.168.0.10"

        [[hosts]]
        name = "Kiosk"
        address = "192.168.0.11"
        password = "other"
        enabled = false
    "#;

    #[test]
    fn defaults_applied() {
        let config = parse_config(CONFIG).unwrap();

        assert_eq!(config.service.poll_interval_idle, Duration::from_millis(2500));
        assert_eq!(config.service.poll_interval_active, Duration::from_secs(3));
        assert_eq!(config.service.credential_ttl, Duration::from_secs(60));
        assert_eq!(
            config.service.catalog_path,
            PathBuf::from("/var/lib/warden/products.json")
        );
        assert_eq!(config.authority.base_url, DEFAULT_AUTHORITY_URL);
        assert_eq!(config.supervisor.probe_concurrency, 4);
    }

    #[test]
    fn hosts_inherit_default_credentials() {
        let config = parse_config(CONFIG).unwrap();

        let first = &config.hosts[0].identity;
        assert_eq!(first.name.as_str(), "PC-01");
        assert_eq!(first.login, "admin");
        assert_eq!(first.password, "secret");

        let second = &config.hosts[1].identity;
        assert_eq!(second.name.as_str(), "Kiosk");
        assert_eq!(second.password, "other");
        assert_eq!(config.enabled_hosts().count(), 1);
    }

    #[test]
    fn to_raw_omits_inherited_credentials() {
        let config = parse_config(CONFIG).unwrap();
        let raw = config.to_raw();

        assert!(raw.hosts[0].login.is_none());
        assert!(raw.hosts[0].password.is_none());
        assert_eq!(raw.hosts[1].password.as_deref(), Some("other"));
        assert!(!raw.hosts[1].enabled);
        assert!(raw.service.catalog_path.is_none());
    }
}
