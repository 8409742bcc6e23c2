//! Local launcher for single-host worker processes

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;
use warden_api::HostIdentity;
use warden_host_api::{HostError, HostResult, WorkerLauncher, WorkerProcess};

use crate::ManagedProcess;

/// Subcommand that runs a single-host worker
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Spawns `<program> worker` per host
pub struct LinuxLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl LinuxLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Launcher re-executing the running binary in worker mode
    pub fn current_exe() -> HostResult<Self> {
        let program = std::env::current_exe().map_err(|e| {
            HostError::SpawnFailed(format!("Cannot locate current executable: {}", e))
        })?;
        Ok(Self::new(program, vec![WORKER_SUBCOMMAND.to_string()]))
    }
}

impl WorkerLauncher for LinuxLauncher {
    fn spawn(
        &self,
        host: &HostIdentity,
        env: &BTreeMap<String, String>,
    ) -> HostResult<Box<dyn WorkerProcess>> {
        let process = ManagedProcess::spawn(&self.program, &self.args, env)?;
        info!(
            host = %host.name,
            pid = process.pgid(),
            "Worker process launched"
        );
        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn worker_sees_only_its_variables() {
        let launcher = LinuxLauncher::new(
            "/bin/sh",
            vec![
                "-c".into(),
                "test \"$WARDEN_HOST\" = 10.0.0.1 && test -z \"$WARDEN_CONFIG\"".into(),
            ],
        );
        let host = HostIdentity::new("PC-01", "10.0.0.1", "admin", "");
        let env = BTreeMap::from([("WARDEN_HOST".to_string(), "10.0.0.1".to_string())]);

        let mut process = launcher.spawn(&host, &env).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let status = loop {
            if let Some(status) = process.try_wait().unwrap() {
                break status;
            }
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        };
        assert!(status.is_success());
    }
}
