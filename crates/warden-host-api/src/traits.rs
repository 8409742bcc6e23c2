//! Host collaborator traits

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use warden_api::{CredentialPair, HostIdentity, Session};

use crate::{CommandOutput, ExitStatus};

/// Errors from host collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Command `{command}` failed with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Credential source unavailable: {0}")]
    CredentialSource(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Host-local, read-only source of credential pairs
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Every pair registered on the host, in discovery order
    async fn query_credentials(&self) -> HostResult<Vec<CredentialPair>>;
}

/// An open connection to one managed host
#[async_trait]
pub trait HostConnection: CredentialSource {
    /// Run a command on the host and capture its output
    async fn run(&self, command: &str) -> HostResult<CommandOutput>;

    /// Release the connection
    async fn close(&self) {}
}

/// Opens connections to managed hosts
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(&self, host: &HostIdentity) -> HostResult<Box<dyn HostConnection>>;
}

/// Before/After session actions
///
/// A `false` result or an error is recorded by the caller and never aborts
/// the worker's cycle.
#[async_trait]
pub trait SessionActions: Send + Sync {
    /// Prepare the host for a desktop session that has just been claimed
    async fn before_session(
        &self,
        conn: &dyn HostConnection,
        host: &HostIdentity,
        session: &Session,
    ) -> HostResult<bool>;

    /// Clean the host up after a session ended or a reboot is required
    async fn after_session(
        &self,
        conn: &dyn HostConnection,
        host: &HostIdentity,
        streaming: bool,
    ) -> HostResult<bool>;
}

/// Read-only host checks used by diagnostics
#[async_trait]
pub trait HostInspector: Send + Sync {
    /// Whether disk protection (shadow mode) is active
    async fn protection_mode(&self, conn: &dyn HostConnection) -> HostResult<bool>;

    /// Whether every configured restriction is in place
    async fn restrictions_ok(&self, conn: &dyn HostConnection) -> HostResult<bool>;
}

/// Handle to a spawned worker process
pub trait WorkerProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Exit status if the process has exited
    fn try_wait(&mut self) -> HostResult<Option<ExitStatus>>;

    /// Ask the process to exit
    fn terminate(&mut self) -> HostResult<()>;

    /// Force the process to exit
    fn kill(&mut self) -> HostResult<()>;
}

/// Starts single-host worker processes
pub trait WorkerLauncher: Send + Sync {
    /// Spawn a worker for `host` with exactly `env` as its worker variables
    fn spawn(
        &self,
        host: &HostIdentity,
        env: &BTreeMap<String, String>,
    ) -> HostResult<Box<dyn WorkerProcess>>;
}
