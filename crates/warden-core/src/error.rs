//! Cycle-level outcomes

use thiserror::Error;
use warden_authority::AuthorityError;
use warden_host_api::HostError;

/// Why a worker cycle stopped early
#[derive(Debug, Error)]
pub enum CycleError {
    /// The host's credential source is unusable until it reboots.
    ///
    /// Not a fault: the worker runs the after action and reconnects.
    #[error("Host requires a reboot")]
    RebootRequired,

    #[error("Authority error: {0}")]
    Authority(#[from] AuthorityError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

impl CycleError {
    pub fn is_reboot_required(&self) -> bool {
        matches!(self, Self::RebootRequired)
    }
}

pub type CycleResult<T> = Result<T, CycleError>;
