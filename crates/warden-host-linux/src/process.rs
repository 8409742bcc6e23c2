//! Worker child processes in their own process group

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tracing::debug;

use warden_host_api::{ExitStatus, HostError, HostResult, WorkerProcess};

/// Variables a worker inherits from the supervisor's environment
const INHERITED_VARS: &[&str] = &["PATH", "HOME", "RUST_LOG"];

/// A spawned child that leads its own process group
pub struct ManagedProcess {
    child: Child,
    pid: u32,
    pgid: u32,
}

impl ManagedProcess {
    /// Spawn `program` with a cleared environment plus `env`.
    ///
    /// Stdout and stderr are inherited so worker logs reach the supervisor's
    /// output.
    pub fn spawn<I, S>(program: &Path, args: I, env: &BTreeMap<String, String>) -> HostResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args);

        cmd.env_clear();
        for key in INHERITED_VARS {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.envs(env);
        cmd.stdin(Stdio::null());

        // SAFETY: setsid is async-signal-safe
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            HostError::SpawnFailed(format!("Failed to spawn {}: {}", program.display(), e))
        })?;

        let pid = child.id();
        // After setsid, pid == pgid
        let pgid = pid;

        debug!(pid, pgid, program = %program.display(), "Process spawned");

        Ok(Self { child, pid, pgid })
    }

    pub fn pgid(&self) -> u32 {
        self.pgid
    }

    fn signal_group(&self, sig: Signal) -> HostResult<()> {
        let group = Pid::from_raw(-(self.pgid as i32));

        match signal::kill(group, sig) {
            Ok(()) => {
                debug!(pgid = self.pgid, signal = sig.as_str(), "Signaled process group");
                Ok(())
            }
            // Already gone
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(HostError::StopFailed(format!("Failed to send {}: {}", sig.as_str(), e))),
        }
    }
}

impl WorkerProcess for ManagedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> HostResult<Option<ExitStatus>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(convert_status(status))),
            Ok(None) => Ok(None),
            Err(e) => Err(HostError::Internal(format!("Wait failed: {}", e))),
        }
    }

    fn terminate(&mut self) -> HostResult<()> {
        self.signal_group(Signal::SIGTERM)
    }

    fn kill(&mut self) -> HostResult<()> {
        self.signal_group(Signal::SIGKILL)
    }
}

fn convert_status(status: std::process::ExitStatus) -> ExitStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::with_code(code),
        (None, Some(sig)) => ExitStatus::signaled(sig),
        (None, None) => ExitStatus::with_code(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_exit(proc: &mut ManagedProcess) -> ExitStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(status) = proc.try_wait().unwrap() {
                return status;
            }
            assert!(Instant::now() < deadline, "process did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn spawn_and_exit_code() {
        let env = BTreeMap::from([("WARDEN_TEST_CODE".to_string(), "3".to_string())]);
        let mut proc = ManagedProcess::spawn(
            Path::new("/bin/sh"),
            ["-c", "exit $WARDEN_TEST_CODE"],
            &env,
        )
        .unwrap();

        assert_eq!(wait_exit(&mut proc), ExitStatus::with_code(3));
    }

    #[test]
    fn environment_is_cleared() {
        // SAFETY: test-local variable, read only by the child
        unsafe { std::env::set_var("WARDEN_TEST_LEAK", "1") };
        let mut proc = ManagedProcess::spawn(
            Path::new("/bin/sh"),
            ["-c", "test -z \"$WARDEN_TEST_LEAK\""],
            &BTreeMap::new(),
        )
        .unwrap();

        assert!(wait_exit(&mut proc).is_success());
    }

    #[test]
    fn terminate_signals_group() {
        let mut proc =
            ManagedProcess::spawn(Path::new("sleep"), ["60"], &BTreeMap::new()).unwrap();
        assert_eq!(proc.pgid(), proc.pid().unwrap());

        proc.terminate().unwrap();

        let status = wait_exit(&mut proc);
        assert_eq!(status.reported_code(), -15);
    }

    #[test]
    fn signaling_exited_process_is_ok() {
        let mut proc =
            ManagedProcess::spawn(Path::new("true"), Vec::<&str>::new(), &BTreeMap::new())
                .unwrap();
        wait_exit(&mut proc);

        assert!(proc.kill().is_ok());
    }

    #[test]
    fn missing_program_fails() {
        let result = ManagedProcess::spawn(
            Path::new("/nonexistent/wardend"),
            ["worker"],
            &BTreeMap::new(),
        );
        assert!(matches!(result, Err(HostError::SpawnFailed(_))));
    }
}
