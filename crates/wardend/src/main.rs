//! wardend - desktop session lifecycle service
//!
//! Wires together configuration, the session authority client, the
//! classification catalog and the Linux host adapters, then runs one of:
//! - `fleet`: every enabled host as a task in this process
//! - `supervise`: every enabled host as its own worker process
//! - `worker`: a single host described by the worker environment

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_authority::{AuthorityClientConfig, HttpAuthority, SessionAuthority};
use warden_config::{FleetConfig, WorkerEnv, load_config};
use warden_core::{
    DiagnosticProber, FleetSupervisor, HostWorker, ProcessSupervisor, WorkerDeps, WorkerSettings,
    refresh_catalog,
};
use warden_host_linux::{CommandActions, CommandInspector, LinuxLauncher, SshConnector};
use warden_store::JsonCatalog;
use warden_util::default_config_path;

/// wardend - Desktop session lifecycle for remote hosts
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(about = "Desktop session lifecycle for a fleet of remote hosts", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/warden/config.toml)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Mode {
    /// Run a worker task per enabled host in this process
    Fleet,
    /// Run a worker process per enabled host and restart crashed ones
    Supervise,
    /// Run a single host from WARDEN_HOST and friends; reads no config file
    Worker,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogFormat {
    Text,
    Json,
}

/// SIGTERM, SIGINT and SIGHUP all mean graceful shutdown
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = self.sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
            _ = self.sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
        }
    }

    /// Drive `run` to completion, calling `stop` once on the first signal
    async fn run_until<F>(&mut self, run: F, stop: impl FnOnce())
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => return,
            _ = self.recv() => stop(),
        }
        run.await;
    }
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

fn authority(config: &FleetConfig) -> Arc<HttpAuthority> {
    Arc::new(HttpAuthority::new(AuthorityClientConfig {
        base_url: config.authority.base_url.clone(),
        product_list_url: config.authority.product_list_url.clone(),
        timeout: config.service.http_timeout,
    }))
}

fn open_catalog(path: &Path) -> Result<Arc<JsonCatalog>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {:?}", dir))?;
    }
    Ok(Arc::new(JsonCatalog::open(path)))
}

fn worker_deps(config: &FleetConfig) -> Result<WorkerDeps> {
    Ok(WorkerDeps {
        authority: authority(config),
        catalog: open_catalog(&config.service.catalog_path)?,
        connector: Arc::new(SshConnector::default()),
        actions: Arc::new(CommandActions::from_config(&config.actions)),
    })
}

fn load(path: &Path) -> Result<FleetConfig> {
    let config =
        load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?;
    info!(
        config_path = %path.display(),
        hosts = config.hosts.len(),
        enabled = config.enabled_hosts().count(),
        "Configuration loaded"
    );
    Ok(config)
}

async fn run_fleet(args: &Args, signals: &mut ShutdownSignals) -> Result<()> {
    let config = load(&args.config)?;
    let fleet = FleetSupervisor::new(&config, worker_deps(&config)?);

    signals.run_until(fleet.run(), || fleet.shutdown()).await;
    fleet.close().await;
    Ok(())
}

async fn run_supervisor(args: &Args, signals: &mut ShutdownSignals) -> Result<()> {
    let config = load(&args.config)?;
    let authority = authority(&config);
    let catalog = open_catalog(&config.service.catalog_path)?;
    refresh_catalog(&*authority, &*catalog, config.service.catalog_refresh).await;

    let prober = DiagnosticProber::new(
        Arc::new(SshConnector::default()),
        Arc::new(CommandInspector::from_config(&config.actions)),
        authority.clone(),
        config.supervisor.probe_concurrency,
    );
    let launcher = Arc::new(LinuxLauncher::current_exe().context("Failed to set up launcher")?);
    let supervisor = ProcessSupervisor::new(config, &args.config, launcher, prober);

    let (stop_tx, stop_rx) = watch::channel(false);
    signals
        .run_until(supervisor.run(stop_rx), || {
            stop_tx.send_replace(true);
        })
        .await;

    authority.close().await;
    Ok(())
}

async fn run_worker(signals: &mut ShutdownSignals) -> Result<()> {
    let config =
        WorkerEnv::config_from_vars(std::env::vars()).context("Invalid worker environment")?;
    let host = config
        .enabled_hosts()
        .next()
        .cloned()
        .context("Worker environment names no host")?;
    let deps = worker_deps(&config)?;
    let authority = deps.authority.clone();

    let worker = HostWorker::new(host, WorkerSettings::from_config(&config), deps);
    let (stop_tx, stop_rx) = watch::channel(false);
    signals
        .run_until(worker.run(stop_rx), || {
            stop_tx.send_replace(true);
        })
        .await;

    authority.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?args.mode,
        "wardend starting"
    );

    let mut signals = ShutdownSignals::install()?;
    match args.mode {
        Mode::Fleet => run_fleet(&args, &mut signals).await?,
        Mode::Supervise => run_supervisor(&args, &mut signals).await?,
        Mode::Worker => run_worker(&mut signals).await?,
    }

    info!("Shutdown complete");
    Ok(())
}
