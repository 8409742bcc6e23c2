//! Host-side value types: identity, worker phase, supervisor status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_util::HostName;

use crate::SessionStatus;

/// Everything needed to reach one managed host. Immutable once loaded.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub name: HostName,
    /// Network address (IP or DNS name)
    pub address: String,
    pub login: String,
    #[serde(default)]
    pub password: String,
}

impl HostIdentity {
    pub fn new(
        name: impl Into<HostName>,
        address: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            login: login.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostIdentity")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Phase of a host worker's cycle
///
/// `Connecting -> IdlePoll -> SessionActive -> Cleanup -> Connecting ...`,
/// with `RebootPending` reachable from any active phase and always followed
/// by `Cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Connecting,
    IdlePoll,
    SessionActive,
    RebootPending,
    Cleanup,
    Stopped,
}

/// What the diagnostic probe saw on the authority for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionProbe {
    /// No live session on any credential pair
    Idle,
    /// A live session exists
    Busy { status: SessionStatus },
    /// Credential source unusable until the host reboots
    RebootRequired,
}

/// Read-only, independently refreshed observability snapshot of a host.
///
/// Each field is `None` when its check failed or has not run yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDiagnostic {
    pub ssh_ok: Option<bool>,
    pub shadow_mode: Option<bool>,
    pub restrictions_ok: Option<bool>,
    pub session_state: Option<SessionProbe>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Supervisor-level state of a host's worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    /// Enabled but not running, or exited cleanly
    Stopped,
    /// Exited with a non-zero code
    Error,
    Disabled,
}

/// Status row for one host in the process supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStatus {
    pub name: HostName,
    pub address: String,
    pub enabled: bool,
    pub running: bool,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub diagnostic: HostDiagnostic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_debug_hides_password() {
        let host = HostIdentity::new("PC-01", "192.168.0.10", "admin", "hunter2");
        let rendered = format!("{:?}", host);
        assert!(rendered.contains("192.168.0.10"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn session_probe_serialization() {
        let probe = SessionProbe::Busy {
            status: SessionStatus::Active,
        };
        let json = serde_json::to_string(&probe).unwrap();
        assert_eq!(json, r#"{"state":"busy","status":"ACTIVE"}"#);
    }

    #[test]
    fn empty_diagnostic_has_no_fields() {
        let diag = HostDiagnostic::default();
        assert!(diag.ssh_ok.is_none());
        assert!(diag.last_checked.is_none());
    }
}
