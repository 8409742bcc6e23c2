//! Configuration validation

use crate::schema::{RawConfig, RawHost};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Host '{host}': {message}")]
    HostError { host: String, message: String },

    #[error("Duplicate host name: {0}")]
    DuplicateHostName(String),

    #[error("Duplicate host address: {0}")]
    DuplicateHostAddress(String),

    #[error("Setting '{setting}' must be greater than zero")]
    NonPositive { setting: &'static str },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_names = HashSet::new();
    let mut seen_addresses = HashSet::new();
    for (index, host) in config.hosts.iter().enumerate() {
        let name = host_display_name(host, index);
        if !seen_names.insert(name.clone()) {
            errors.push(ValidationError::DuplicateHostName(name));
        }
        if !seen_addresses.insert(host.address.trim().to_string()) {
            errors.push(ValidationError::DuplicateHostAddress(host.address.clone()));
        }
    }

    for (index, host) in config.hosts.iter().enumerate() {
        errors.extend(validate_host(host, index, config));
    }

    errors.extend(validate_settings(config));

    errors
}

/// Name a host gets when the config does not give it one
pub fn host_display_name(host: &RawHost, index: usize) -> String {
    host.name
        .clone()
        .unwrap_or_else(|| format!("PC-{:02}", index + 1))
}

fn validate_host(host: &RawHost, index: usize, config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let name = host_display_name(host, index);

    if host.address.trim().is_empty() {
        errors.push(ValidationError::HostError {
            host: name.clone(),
            message: "address cannot be empty".into(),
        });
    }

    if host.address.chars().any(char::is_whitespace) {
        errors.push(ValidationError::HostError {
            host: name.clone(),
            message: "address cannot contain whitespace".into(),
        });
    }

    let has_login = host.login.as_deref().or(config.defaults.login.as_deref()).is_some_and(|l| !l.is_empty());
    if !has_login {
        errors.push(ValidationError::HostError {
            host: name,
            message: "no login set and no default login configured".into(),
        });
    }

    errors
}

fn validate_settings(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let service = &config.service;

    let float_settings = [
        ("service.poll_interval_idle_secs", service.poll_interval_idle_secs),
        ("service.poll_interval_active_secs", service.poll_interval_active_secs),
        ("service.reconnect_delay_secs", service.reconnect_delay_secs),
        ("service.error_delay_secs", service.error_delay_secs),
    ];
    for (setting, value) in float_settings {
        if let Some(v) = value
            && !(v.is_finite() && v > 0.0)
        {
            errors.push(ValidationError::NonPositive { setting });
        }
    }

    let supervisor = &config.supervisor;
    let int_settings = [
        ("service.http_timeout_secs", service.http_timeout_secs),
        ("service.credential_ttl_secs", service.credential_ttl_secs),
        ("service.catalog_refresh_secs", service.catalog_refresh_secs),
        ("supervisor.monitor_interval_secs", supervisor.monitor_interval_secs),
        ("supervisor.probe_interval_secs", supervisor.probe_interval_secs),
        ("supervisor.probe_concurrency", supervisor.probe_concurrency.map(|c| c as u64)),
    ];
    for (setting, value) in int_settings {
        if value == Some(0) {
            errors.push(ValidationError::NonPositive { setting });
        }
    }

    if let Some(url) = &config.authority.base_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::GlobalError(format!(
            "authority.base_url must be an http(s) URL, got '{}'",
            url
        )));
    }

    errors
}
