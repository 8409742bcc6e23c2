//! Per-host worker processes: start, stop, crash restart, diagnostics
//!
//! `start`, `stop`, `add_host`, `remove_host` and `status` form the
//! control-plane API an operator surface drives; `run` owns the monitor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};
use warden_api::{HostIdentity, HostStatus, WorkerState};
use warden_config::{ConfigError, FleetConfig, HostEntry, WorkerEnv, save_config};
use warden_host_api::{ExitStatus, HostError, WorkerLauncher, WorkerProcess};
use warden_util::HostName;

use crate::DiagnosticProber;
use crate::session::sleep_or_stop;

/// How often a stopping process is checked for exit
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Host already exists: {0}")]
    DuplicateHost(String),

    #[error("Unknown host: {0}")]
    UnknownHost(HostName),

    #[error("Failed to persist configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker process error: {0}")]
    Host(#[from] HostError),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// One supervised host and its worker process
pub struct ProcessRecord {
    pub identity: HostIdentity,
    pub enabled: bool,
    process: Option<Box<dyn WorkerProcess>>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    /// An exit was observed and not yet handed to the monitor
    crash_pending: bool,
}

impl ProcessRecord {
    fn new(identity: HostIdentity, enabled: bool) -> Self {
        Self {
            identity,
            enabled,
            process: None,
            pid: None,
            exit_code: None,
            crash_pending: false,
        }
    }

    /// Process is alive; an exit found here is recorded
    fn is_running(&mut self) -> bool {
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        match process.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit_code = Some(status.reported_code());
                self.process = None;
                self.crash_pending = true;
                false
            }
            Err(e) => {
                warn!(host = %self.identity.name, error = %e, "Failed to poll worker");
                true
            }
        }
    }

    fn state(&mut self) -> WorkerState {
        if self.is_running() {
            WorkerState::Running
        } else if !self.enabled {
            WorkerState::Disabled
        } else if self.exit_code.is_some_and(|code| code != 0) {
            WorkerState::Error
        } else {
            WorkerState::Stopped
        }
    }
}

struct SupervisorState {
    config: FleetConfig,
    records: Vec<ProcessRecord>,
}

impl SupervisorState {
    fn record_mut(&mut self, name: &HostName) -> SupervisorResult<&mut ProcessRecord> {
        self.records
            .iter_mut()
            .find(|r| &r.identity.name == name)
            .ok_or_else(|| SupervisorError::UnknownHost(name.clone()))
    }

    /// Config reflecting the current host list and enabled flags
    fn snapshot(&self) -> FleetConfig {
        let mut config = self.config.clone();
        config.hosts = self
            .records
            .iter()
            .map(|r| HostEntry {
                identity: r.identity.clone(),
                enabled: r.enabled,
            })
            .collect();
        config
    }
}

/// Runs each host worker as its own OS process.
///
/// A crashed worker of an enabled host is restarted; disabled hosts are
/// never restarted.
pub struct ProcessSupervisor {
    config_path: PathBuf,
    launcher: Arc<dyn WorkerLauncher>,
    prober: DiagnosticProber,
    state: Mutex<SupervisorState>,
}

impl ProcessSupervisor {
    pub fn new(
        config: FleetConfig,
        config_path: impl Into<PathBuf>,
        launcher: Arc<dyn WorkerLauncher>,
        prober: DiagnosticProber,
    ) -> Self {
        let records = config
            .hosts
            .iter()
            .map(|h| ProcessRecord::new(h.identity.clone(), h.enabled))
            .collect();

        Self {
            config_path: config_path.into(),
            launcher,
            prober,
            state: Mutex::new(SupervisorState { config, records }),
        }
    }

    /// Start a host's worker and enable it. No-op while it is running.
    pub async fn start(&self, name: &HostName) -> SupervisorResult<()> {
        let mut state = self.state.lock().await;
        let config = state.config.clone();
        let record = state.record_mut(name)?;
        if record.is_running() {
            return Ok(());
        }

        let was_enabled = record.enabled;
        record.enabled = true;
        self.spawn(&config, record)?;

        if !was_enabled {
            self.persist(&mut state)?;
        }
        Ok(())
    }

    /// Start every enabled host
    pub async fn start_all(&self) {
        let mut state = self.state.lock().await;
        let config = state.config.clone();
        for record in state.records.iter_mut().filter(|r| r.enabled) {
            if record.is_running() {
                continue;
            }
            if let Err(e) = self.spawn(&config, record) {
                error!(host = %record.identity.name, error = %e, "Failed to start worker");
            }
        }
    }

    /// Stop a host's worker and disable it
    pub async fn stop(&self, name: &HostName) -> SupervisorResult<()> {
        let process = {
            let mut state = self.state.lock().await;
            let record = state.record_mut(name)?;
            record.enabled = false;
            record.crash_pending = false;
            record.process.take()
        };

        if let Some(process) = process {
            let status = self.terminate(name, process).await;
            let mut state = self.state.lock().await;
            if let Ok(record) = state.record_mut(name) {
                record.exit_code = status.map(|s| s.reported_code());
            }
        }

        let mut state = self.state.lock().await;
        self.persist(&mut state)
    }

    /// Add a new host, persist it and start its worker
    pub async fn add_host(&self, identity: HostIdentity) -> SupervisorResult<()> {
        {
            let mut state = self.state.lock().await;
            let duplicate = state.records.iter().any(|r| {
                r.identity.name == identity.name || r.identity.address == identity.address
            });
            if duplicate {
                return Err(SupervisorError::DuplicateHost(identity.name.to_string()));
            }

            // Enabled by start() below
            state.records.push(ProcessRecord::new(identity.clone(), false));
            self.persist(&mut state)?;
        }

        info!(host = %identity.name, address = %identity.address, "Host added");
        self.start(&identity.name).await
    }

    /// Stop a host's worker and forget the host
    pub async fn remove_host(&self, name: &HostName) -> SupervisorResult<()> {
        self.stop(name).await?;

        {
            let mut state = self.state.lock().await;
            state.records.retain(|r| &r.identity.name != name);
            self.persist(&mut state)?;
        }

        self.prober.forget(name).await;
        info!(host = %name, "Host removed");
        Ok(())
    }

    /// Status row for every host
    pub async fn status(&self) -> Vec<HostStatus> {
        let rows: Vec<_> = {
            let mut state = self.state.lock().await;
            state
                .records
                .iter_mut()
                .map(|r| {
                    let worker_state = r.state();
                    (
                        r.identity.clone(),
                        r.enabled,
                        worker_state,
                        r.pid,
                        r.exit_code,
                    )
                })
                .collect()
        };

        let mut statuses = Vec::with_capacity(rows.len());
        for (identity, enabled, state, pid, exit_code) in rows {
            statuses.push(HostStatus {
                diagnostic: self.prober.get(&identity.name).await,
                name: identity.name,
                address: identity.address,
                enabled,
                running: state == WorkerState::Running,
                state,
                pid,
                exit_code,
            });
        }
        statuses
    }

    /// Collect exited workers of enabled hosts. Each exit is reported once.
    pub async fn reap(&self) -> Vec<HostName> {
        let mut state = self.state.lock().await;
        let mut crashed = Vec::new();

        for record in state.records.iter_mut() {
            // Exits seen earlier by status() or start() are still pending here
            if record.is_running() || !record.crash_pending {
                continue;
            }
            record.crash_pending = false;
            if record.enabled {
                warn!(
                    host = %record.identity.name,
                    exit_code = ?record.exit_code,
                    "Worker exited, will restart"
                );
                crashed.push(record.identity.name.clone());
            }
        }
        crashed
    }

    /// Restart a reaped host if it is still enabled and not running
    pub async fn restart(&self, name: &HostName) -> SupervisorResult<()> {
        let mut state = self.state.lock().await;
        let config = state.config.clone();
        let record = state.record_mut(name)?;
        if !record.enabled || record.is_running() {
            return Ok(());
        }
        self.spawn(&config, record)
    }

    /// Run monitor and probe loops until `stop` fires, then stop all workers
    pub async fn run(&self, stop: watch::Receiver<bool>) {
        self.start_all().await;

        let (monitor_interval, restart_delay, probe_interval) = {
            let state = self.state.lock().await;
            let s = &state.config.supervisor;
            (s.monitor_interval, s.restart_delay, s.probe_interval)
        };

        let monitor = {
            let mut stop = stop.clone();
            async move {
                loop {
                    if sleep_or_stop(monitor_interval, &mut stop).await {
                        return;
                    }
                    let crashed = self.reap().await;
                    if crashed.is_empty() {
                        continue;
                    }
                    if sleep_or_stop(restart_delay, &mut stop).await {
                        return;
                    }
                    for name in crashed {
                        if let Err(e) = self.restart(&name).await {
                            error!(host = %name, error = %e, "Failed to restart worker");
                        }
                    }
                }
            }
        };

        let probe = {
            let mut stop = stop.clone();
            async move {
                loop {
                    let hosts = self.hosts().await;
                    self.prober.sweep(&hosts).await;
                    if sleep_or_stop(probe_interval, &mut stop).await {
                        return;
                    }
                }
            }
        };

        tokio::join!(monitor, probe);
        self.shutdown_workers().await;
    }

    /// Stop every worker process without changing enabled flags
    pub async fn shutdown_workers(&self) {
        let processes: Vec<_> = {
            let mut state = self.state.lock().await;
            state
                .records
                .iter_mut()
                .filter_map(|r| r.process.take().map(|p| (r.identity.name.clone(), p)))
                .collect()
        };

        for (name, process) in processes {
            self.terminate(&name, process).await;
        }
        info!("All workers stopped");
    }

    async fn hosts(&self) -> Vec<HostIdentity> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .map(|r| r.identity.clone())
            .collect()
    }

    fn spawn(&self, config: &FleetConfig, record: &mut ProcessRecord) -> SupervisorResult<()> {
        let env = WorkerEnv::from_host(config, &record.identity)?;
        let process = self.launcher.spawn(&record.identity, &env.into_vars())?;

        record.pid = process.pid();
        record.exit_code = None;
        record.crash_pending = false;
        record.process = Some(process);
        info!(host = %record.identity.name, pid = ?record.pid, "Worker started");
        Ok(())
    }

    /// Terminate, wait up to the stop timeout, then kill
    async fn terminate(
        &self,
        name: &HostName,
        mut process: Box<dyn WorkerProcess>,
    ) -> Option<ExitStatus> {
        let timeout = self.state.lock().await.config.supervisor.stop_timeout;

        if let Err(e) = process.terminate() {
            warn!(host = %name, error = %e, "Failed to terminate worker");
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match process.try_wait() {
                Ok(Some(status)) => {
                    info!(host = %name, ?status, "Worker stopped");
                    return Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(host = %name, error = %e, "Failed to poll worker");
                    break;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        warn!(host = %name, "Worker did not exit in time, killing");
        if let Err(e) = process.kill() {
            error!(host = %name, error = %e, "Failed to kill worker");
        }
        process.try_wait().ok().flatten()
    }

    fn persist(&self, state: &mut SupervisorState) -> SupervisorResult<()> {
        let config = state.snapshot();
        save_config(&self.config_path, &config)?;
        state.config = config;
        Ok(())
    }
}
