//! Remote hosts over the system `ssh` client

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};
use warden_api::{CredentialPair, HostIdentity};
use warden_host_api::{
    CommandOutput, CredentialSource, ExitStatus, HostConnection, HostConnector, HostError,
    HostResult,
};

use crate::{credentials_query, parse_credentials};

/// Exit code `ssh` reserves for its own failures
const SSH_FAILURE_CODE: i32 = 255;

/// Command used to check that a host answers
const NOOP_COMMAND: &str = "exit 0";

/// Environment variable `sshpass -e` reads the password from
const SSHPASS_ENV: &str = "SSHPASS";

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    /// Upper bound for a single remote command
    pub command_timeout: Duration,
    /// Multiplexing socket path template; `None` disables multiplexing
    pub control_path: Option<PathBuf>,
    pub control_persist: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(120),
            control_path: Some(std::env::temp_dir().join("warden-ssh-%C")),
            control_persist: Duration::from_secs(60),
        }
    }
}

/// Opens [`SshConnection`]s
pub struct SshConnector {
    options: Arc<SshOptions>,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(SshOptions::default())
    }
}

#[async_trait]
impl HostConnector for SshConnector {
    async fn connect(&self, host: &HostIdentity) -> HostResult<Box<dyn HostConnection>> {
        let conn = SshConnection {
            host: host.clone(),
            options: self.options.clone(),
        };

        let output = conn.run(NOOP_COMMAND).await?;
        if !output.is_success() {
            return Err(HostError::Unreachable(format!(
                "{}: {}",
                host.address,
                output.stderr.trim()
            )));
        }

        debug!(host = %host.name, "SSH connection established");
        Ok(Box::new(conn))
    }
}

/// One host reached through `ssh`.
///
/// Each command is a separate `ssh` invocation; with multiplexing enabled
/// they share one authenticated connection.
pub struct SshConnection {
    host: HostIdentity,
    options: Arc<SshOptions>,
}

impl SshConnection {
    /// Full argv for running `remote` on the host. Never contains the password.
    pub fn argv(&self, remote: &[&str]) -> Vec<String> {
        let mut argv = Vec::new();
        if self.has_password() {
            argv.extend(["sshpass", "-e", "ssh"].map(String::from));
        } else {
            argv.extend(["ssh", "-o", "BatchMode=yes"].map(String::from));
        }

        let mut option = |value: String| {
            argv.push("-o".into());
            argv.push(value);
        };
        option(format!(
            "ConnectTimeout={}",
            self.options.connect_timeout.as_secs().max(1)
        ));
        option("StrictHostKeyChecking=accept-new".into());
        if let Some(path) = &self.options.control_path {
            option("ControlMaster=auto".into());
            option(format!("ControlPath={}", path.display()));
            option(format!(
                "ControlPersist={}",
                self.options.control_persist.as_secs()
            ));
        }

        if !self.host.login.is_empty() {
            argv.push("-l".into());
            argv.push(self.host.login.clone());
        }
        argv.push(self.host.address.clone());
        argv.extend(remote.iter().map(|s| s.to_string()));
        argv
    }

    fn has_password(&self) -> bool {
        !self.host.password.is_empty()
    }

    fn command(&self, remote: &[&str]) -> Command {
        let argv = self.argv(remote);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.has_password() {
            cmd.env(SSHPASS_ENV, &self.host.password);
        }
        cmd
    }
}

#[async_trait]
impl CredentialSource for SshConnection {
    async fn query_credentials(&self) -> HostResult<Vec<CredentialPair>> {
        let command = credentials_query();
        let output = self.run(&command).await?;
        if !output.is_success() {
            return Err(HostError::CommandFailed {
                command,
                code: output.status.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        parse_credentials(&output.stdout).map_err(|e| HostError::CredentialSource(e.to_string()))
    }
}

#[async_trait]
impl HostConnection for SshConnection {
    async fn run(&self, command: &str) -> HostResult<CommandOutput> {
        trace!(host = %self.host.name, command, "Running remote command");

        let child = self.command(&[command]).spawn()?;
        let output = tokio::time::timeout(self.options.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                HostError::Unreachable(format!(
                    "{}: `{}` timed out after {:?}",
                    self.host.address, command, self.options.command_timeout
                ))
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let status = match output.status.code() {
            Some(SSH_FAILURE_CODE) => {
                return Err(HostError::Unreachable(format!(
                    "{}: {}",
                    self.host.address,
                    stderr.trim()
                )));
            }
            Some(code) => ExitStatus::with_code(code),
            None => ExitStatus::with_code(-1),
        };

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn close(&self) {
        if self.options.control_path.is_none() {
            return;
        }

        let mut argv = self.argv(&[]);
        let host_index = argv.len() - 1;
        argv.insert(host_index, "-O".into());
        argv.insert(host_index + 1, "exit".into());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if self.has_password() {
            cmd.env(SSHPASS_ENV, &self.host.password);
        }

        if let Err(e) = cmd.status().await {
            debug!(host = %self.host.name, error = %e, "Failed to close SSH master");
        }
    }
}
