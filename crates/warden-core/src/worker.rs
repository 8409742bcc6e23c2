//! Per-host worker actor

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use warden_api::{HostIdentity, WorkerPhase};
use warden_authority::SessionAuthority;
use warden_config::FleetConfig;
use warden_host_api::{HostConnection, HostConnector, SessionActions};
use warden_store::ClassificationStore;

use crate::session::sleep_or_stop;
use crate::{CredentialCache, CycleError, CycleResult, EndOutcome, SessionStateMachine};

/// Timing and flags for one worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval_idle: Duration,
    pub poll_interval_active: Duration,
    pub reconnect_delay: Duration,
    pub error_delay: Duration,
    pub credential_ttl: Duration,
    pub streaming: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        let service = &config.service;
        Self {
            poll_interval_idle: service.poll_interval_idle,
            poll_interval_active: service.poll_interval_active,
            reconnect_delay: service.reconnect_delay,
            error_delay: service.error_delay,
            credential_ttl: service.credential_ttl,
            streaming: service.streaming,
        }
    }
}

/// Shared collaborators a worker needs
#[derive(Clone)]
pub struct WorkerDeps {
    pub authority: Arc<dyn SessionAuthority>,
    pub catalog: Arc<dyn ClassificationStore>,
    pub connector: Arc<dyn HostConnector>,
    pub actions: Arc<dyn SessionActions>,
}

/// How a cycle finished without error
enum CycleEnd {
    Completed,
    Stopped,
}

/// One perpetual actor per host.
///
/// Drives `Connecting -> IdlePoll -> SessionActive -> Cleanup` until the stop
/// signal fires. A failed cycle never ends the worker.
pub struct HostWorker {
    host: HostIdentity,
    settings: WorkerSettings,
    connector: Arc<dyn HostConnector>,
    actions: Arc<dyn SessionActions>,
    cache: CredentialCache,
    phase: watch::Sender<WorkerPhase>,
    drained: bool,
}

impl HostWorker {
    pub fn new(host: HostIdentity, settings: WorkerSettings, deps: WorkerDeps) -> Self {
        let cache = CredentialCache::new(
            host.name.clone(),
            deps.authority,
            deps.catalog,
            settings.credential_ttl,
        );
        let (phase, _) = watch::channel(WorkerPhase::Connecting);

        Self {
            host,
            settings,
            connector: deps.connector,
            actions: deps.actions,
            cache,
            phase,
            drained: false,
        }
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Observe phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.subscribe()
    }

    /// Run until `stop` carries `true`
    pub async fn run(mut self, stop: watch::Receiver<bool>) {
        let span = info_span!("worker", host = %self.host.name);
        async move {
            let mut stop = stop;
            info!(address = %self.host.address, "Worker started");
            self.run_loop(&mut stop).await;
            self.set_phase(WorkerPhase::Stopped);
            info!("Worker stopped");
        }
        .instrument(span)
        .await
    }

    async fn run_loop(&mut self, stop: &mut watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }

            self.set_phase(WorkerPhase::Connecting);
            let conn = match self.connector.connect(&self.host).await {
                Ok(conn) => conn,
                Err(e) => {
                    debug!(error = %e, "Host unreachable, retrying");
                    if sleep_or_stop(self.settings.reconnect_delay, stop).await {
                        return;
                    }
                    continue;
                }
            };

            let result = self.cycle(conn.as_ref(), stop).await;
            let stopped = match result {
                Ok(CycleEnd::Completed) => false,
                Ok(CycleEnd::Stopped) => true,
                Err(CycleError::RebootRequired) => {
                    info!("Reboot required, running cleanup");
                    self.set_phase(WorkerPhase::RebootPending);
                    self.cleanup(conn.as_ref()).await;
                    self.cache.invalidate();
                    false
                }
                Err(e) => {
                    error!(error = %e, "Cycle failed");
                    self.cache.clear_active();
                    conn.close().await;
                    if sleep_or_stop(self.settings.error_delay, stop).await {
                        return;
                    }
                    continue;
                }
            };

            conn.close().await;
            if stopped {
                return;
            }
        }
    }

    /// One pass from detection through cleanup.
    ///
    /// The first pass after start resumes a session already in progress
    /// without running the before action.
    async fn cycle(
        &mut self,
        conn: &dyn HostConnection,
        stop: &mut watch::Receiver<bool>,
    ) -> CycleResult<CycleEnd> {
        let resuming = !self.drained;
        self.drained = true;

        self.set_phase(WorkerPhase::IdlePoll);
        let settings = self.settings.clone();
        let mut sm = SessionStateMachine::new(&mut self.cache, conn);

        let (session, already_running) = match sm.check_active().await? {
            Some(session) => (session, resuming),
            None => match sm.wait_for_new(settings.poll_interval_idle, stop).await? {
                Some(session) => (session, false),
                None => return Ok(CycleEnd::Stopped),
            },
        };

        self.set_phase(WorkerPhase::SessionActive);
        if already_running {
            info!(session = %session.id, "Resuming session already in progress");
        } else {
            match self.actions.before_session(conn, &self.host, &session).await {
                Ok(true) => info!(session = %session.id, "Before action done"),
                Ok(false) => warn!(session = %session.id, "Before action reported failure"),
                Err(e) => warn!(session = %session.id, error = %e, "Before action failed"),
            }
        }

        let mut sm = SessionStateMachine::new(&mut self.cache, conn);
        match sm.wait_for_end(settings.poll_interval_active, stop).await? {
            EndOutcome::Ended(status) => {
                info!(session = %session.id, status = ?status, "Session ended");
            }
            EndOutcome::Vanished => {
                warn!(session = %session.id, "Session vanished from authority");
            }
            EndOutcome::Stopped => return Ok(CycleEnd::Stopped),
        }

        self.cleanup(conn).await;
        Ok(CycleEnd::Completed)
    }

    async fn cleanup(&mut self, conn: &dyn HostConnection) {
        self.set_phase(WorkerPhase::Cleanup);
        match self
            .actions
            .after_session(conn, &self.host, self.settings.streaming)
            .await
        {
            Ok(true) => info!("After action done"),
            Ok(false) => warn!("After action reported failure"),
            Err(e) => warn!(error = %e, "After action failed"),
        }
        self.cache.clear_active();
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.send_replace(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_api::{CredentialPair, DESKTOP_PRODUCT_ID, SessionStatus};
    use warden_authority::{MockAuthority, mock_session};
    use warden_host_api::{ActionEvent, MockActions, MockConnector};
    use warden_store::JsonCatalog;

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval_idle: Duration::from_millis(5),
            poll_interval_active: Duration::from_millis(5),
            reconnect_delay: Duration::from_millis(5),
            error_delay: Duration::from_millis(5),
            credential_ttl: Duration::from_secs(60),
            streaming: true,
        }
    }

    struct Harness {
        authority: Arc<MockAuthority>,
        connector: Arc<MockConnector>,
        actions: Arc<MockActions>,
        worker: HostWorker,
    }

    fn harness(pairs: Option<Vec<CredentialPair>>) -> Harness {
        let authority = Arc::new(MockAuthority::new());
        let connector = Arc::new(MockConnector::new());
        connector.set_credentials(pairs);
        let actions = Arc::new(MockActions::new());
        let worker = HostWorker::new(
            HostIdentity::new("PC-01", "10.0.0.1", "admin", "pw"),
            settings(),
            WorkerDeps {
                authority: authority.clone(),
                catalog: Arc::new(JsonCatalog::in_memory()),
                connector: connector.clone(),
                actions: actions.clone(),
            },
        );
        Harness {
            authority,
            connector,
            actions,
            worker,
        }
    }

    #[tokio::test]
    async fn test_full_cycle_runs_before_then_after() {
        let h = harness(Some(vec![CredentialPair::new("s1", "t1")]));
        h.authority.script(
            "s1",
            [
                None,
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::New)),
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Active)),
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Finished)),
                None,
            ],
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.worker.run(rx));

        assert!(h.actions.wait_for_after(1, Duration::from_secs(5)).await);
        tx.send(true).unwrap();
        task.await.unwrap();

        let events = h.actions.events();
        assert!(matches!(events[0], ActionEvent::Before { .. }));
        assert!(matches!(events[1], ActionEvent::After { streaming: true, .. }));
        assert_eq!(h.actions.before_count(), 1);
    }

    #[tokio::test]
    async fn test_resumed_session_skips_before() {
        let h = harness(Some(vec![CredentialPair::new("s1", "t1")]));
        h.authority.script(
            "s1",
            [
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Active)),
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Finished)),
            ],
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.worker.run(rx));

        assert!(h.actions.wait_for_after(1, Duration::from_secs(5)).await);
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(h.actions.before_count(), 0);
    }

    #[tokio::test]
    async fn test_reboot_required_runs_after_and_keeps_going() {
        let h = harness(Some(vec![]));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.worker.run(rx));

        assert!(h.actions.wait_for_after(2, Duration::from_secs(5)).await);
        assert!(!task.is_finished());
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(h.actions.before_count(), 0);
        assert!(h.connector.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_unreachable_host_retries() {
        let h = harness(Some(vec![CredentialPair::new("s1", "t1")]));
        *h.connector.fail_connect.lock().unwrap() = true;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.worker.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(h.connector.connect_calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        assert!(h.actions.events().is_empty());
    }

    #[tokio::test]
    async fn test_stop_while_active_skips_after() {
        let h = harness(Some(vec![CredentialPair::new("s1", "t1")]));
        h.authority.script(
            "s1",
            [
                None,
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Active)),
            ],
        );
        let (tx, rx) = watch::channel(false);
        let mut phase = h.worker.subscribe_phase();
        let task = tokio::spawn(h.worker.run(rx));

        tokio::time::timeout(
            Duration::from_secs(5),
            phase.wait_for(|p| *p == WorkerPhase::SessionActive),
        )
        .await
        .unwrap()
        .unwrap();
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(h.actions.before_count(), 1);
        assert_eq!(h.actions.after_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_kill_worker() {
        let h = harness(Some(vec![CredentialPair::new("s1", "t1")]));
        let unknown = warden_util::ProductId::parse("22222222-2222-2222-2222-222222222222").unwrap();
        h.authority
            .script("s1", [Some(mock_session(unknown, SessionStatus::Active))]);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(h.worker.run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(h.authority.product_calls() >= 2);
        assert!(h.actions.events().is_empty());
    }
}
