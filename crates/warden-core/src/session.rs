//! Session polling over a host's credential pairs

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use warden_api::{Session, SessionStatus};
use warden_host_api::CredentialSource;

use crate::{CredentialCache, CycleError, CycleResult};

/// How waiting for a session to end came out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    /// The session reached a terminal status
    Ended(SessionStatus),
    /// The authority reports no session at all for the selected pair
    Vanished,
    /// The stop signal fired first
    Stopped,
}

/// Polling operations over one host's credential pairs.
///
/// Holds no state of its own; everything lives in the [`CredentialCache`].
pub struct SessionStateMachine<'a, S: ?Sized> {
    cache: &'a mut CredentialCache,
    source: &'a S,
}

impl<'a, S> SessionStateMachine<'a, S>
where
    S: CredentialSource + ?Sized,
{
    pub fn new(cache: &'a mut CredentialCache, source: &'a S) -> Self {
        Self { cache, source }
    }

    /// First live desktop session in credential discovery order.
    ///
    /// The matching pair becomes the selected pair.
    pub async fn check_active(&mut self) -> CycleResult<Option<Session>> {
        let pairs = self.cache.get_servers(self.source).await?;
        let authority = self.cache.authority().clone();

        for pair in pairs {
            let session = match authority.latest_session(&pair).await {
                Ok(Some(session)) => session,
                Ok(None) => continue,
                Err(e) => {
                    debug!(server_id = %pair.server_id.short(), error = %e, "Session query failed");
                    continue;
                }
            };

            if !session.status.is_live() {
                continue;
            }

            if self.cache.classify(&session, &pair.auth_token).await? {
                info!(
                    server_id = %pair.server_id.short(),
                    session = %session.id,
                    status = ?session.status,
                    "Desktop session found"
                );
                self.cache.set_active(pair);
                return Ok(Some(session));
            }

            debug!(
                server_id = %pair.server_id.short(),
                product_id = %session.product_id,
                "Live session is not a desktop session"
            );
        }

        Ok(None)
    }

    /// Repeat [`check_active`](Self::check_active) every `interval` until a
    /// session appears. Returns `None` only when `stop` fires.
    pub async fn wait_for_new(
        &mut self,
        interval: Duration,
        stop: &mut watch::Receiver<bool>,
    ) -> CycleResult<Option<Session>> {
        loop {
            if *stop.borrow() {
                return Ok(None);
            }

            if let Some(session) = self.check_active().await? {
                return Ok(Some(session));
            }

            if sleep_or_stop(interval, stop).await {
                return Ok(None);
            }
        }
    }

    /// Poll the selected pair every `interval` until its session ends or
    /// disappears.
    pub async fn wait_for_end(
        &mut self,
        interval: Duration,
        stop: &mut watch::Receiver<bool>,
    ) -> CycleResult<EndOutcome> {
        if self.cache.selected().is_none() {
            self.cache.get_servers(self.source).await?;
        }
        let pair = self.cache.selected().ok_or(CycleError::RebootRequired)?;
        let authority = self.cache.authority().clone();

        loop {
            if *stop.borrow() {
                return Ok(EndOutcome::Stopped);
            }

            match authority.latest_session(&pair).await {
                Ok(Some(session)) if session.status.is_terminal() => {
                    return Ok(EndOutcome::Ended(session.status));
                }
                Ok(Some(session)) => {
                    debug!(status = ?session.status, "Session still live");
                }
                Ok(None) => return Ok(EndOutcome::Vanished),
                Err(e) => {
                    debug!(server_id = %pair.server_id.short(), error = %e, "Session query failed");
                }
            }

            if sleep_or_stop(interval, stop).await {
                return Ok(EndOutcome::Stopped);
            }
        }
    }
}

/// Sleep for `duration`. Returns true if `stop` fired first.
pub(crate) async fn sleep_or_stop(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}
