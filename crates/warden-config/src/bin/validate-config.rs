//! Config validation CLI tool
//!
//! Validates a wardend configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use warden_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a wardend configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match warden_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", warden_config::CURRENT_CONFIG_VERSION);
            println!("  Authority: {}", config.authority.base_url);
            println!("  Catalog: {}", config.service.catalog_path.display());
            println!(
                "  Polling: idle {:?}, active {:?}",
                config.service.poll_interval_idle, config.service.poll_interval_active
            );
            println!("  Hosts: {}", config.hosts.len());

            if !config.hosts.is_empty() {
                println!();
                println!("Hosts:");
                for host in &config.hosts {
                    let state = if host.enabled { "enabled" } else { "disabled" };
                    println!(
                        "  - {} [{}]: {}@{}",
                        host.identity.name, state, host.identity.login, host.identity.address
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                warden_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                warden_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                warden_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                warden_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        warden_config::CURRENT_CONFIG_VERSION
                    );
                }
                other => eprintln!("{}", other),
            }
            ExitCode::from(1)
        }
    }
}
