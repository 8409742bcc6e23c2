//! Bounded-concurrency, read-only host diagnostics

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use warden_api::{HostDiagnostic, HostIdentity, SessionProbe};
use warden_authority::SessionAuthority;
use warden_host_api::{HostConnection, HostConnector, HostInspector};
use warden_util::HostName;

/// Periodically gathers a [`HostDiagnostic`] per host.
///
/// Never calls a mutating action; results are for display only.
pub struct DiagnosticProber {
    connector: Arc<dyn HostConnector>,
    inspector: Arc<dyn HostInspector>,
    authority: Arc<dyn SessionAuthority>,
    limit: Arc<Semaphore>,
    results: Arc<RwLock<HashMap<HostName, HostDiagnostic>>>,
}

impl DiagnosticProber {
    pub fn new(
        connector: Arc<dyn HostConnector>,
        inspector: Arc<dyn HostInspector>,
        authority: Arc<dyn SessionAuthority>,
        concurrency: usize,
    ) -> Self {
        Self {
            connector,
            inspector,
            authority,
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Latest diagnostic for a host
    pub async fn get(&self, name: &HostName) -> HostDiagnostic {
        self.results
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn forget(&self, name: &HostName) {
        self.results.write().await.remove(name);
    }

    /// Probe every host once, at most `concurrency` at a time
    pub async fn sweep(&self, hosts: &[HostIdentity]) {
        let mut probes = JoinSet::new();

        for host in hosts.iter().cloned() {
            let limit = self.limit.clone();
            let connector = self.connector.clone();
            let inspector = self.inspector.clone();
            let authority = self.authority.clone();
            let results = self.results.clone();

            probes.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return;
                };
                let diagnostic = probe_host(&host, &*connector, &*inspector, &*authority).await;
                debug!(host = %host.name, ?diagnostic, "Host probed");
                results.write().await.insert(host.name.clone(), diagnostic);
            });
        }

        while let Some(result) = probes.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Probe task failed");
            }
        }
    }
}

async fn probe_host(
    host: &HostIdentity,
    connector: &dyn HostConnector,
    inspector: &dyn HostInspector,
    authority: &dyn SessionAuthority,
) -> HostDiagnostic {
    let mut diagnostic = HostDiagnostic {
        last_checked: Some(warden_util::now()),
        ..Default::default()
    };

    let conn = match connector.connect(host).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!(host = %host.name, error = %e, "Probe could not connect");
            diagnostic.ssh_ok = Some(false);
            return diagnostic;
        }
    };
    diagnostic.ssh_ok = Some(true);

    match inspector.protection_mode(conn.as_ref()).await {
        Ok(on) => diagnostic.shadow_mode = Some(on),
        Err(e) => debug!(host = %host.name, error = %e, "Protection check failed"),
    }

    match inspector.restrictions_ok(conn.as_ref()).await {
        Ok(ok) => diagnostic.restrictions_ok = Some(ok),
        Err(e) => debug!(host = %host.name, error = %e, "Restriction check failed"),
    }

    diagnostic.session_state = session_state(host, conn.as_ref(), authority).await;

    conn.close().await;
    diagnostic
}

async fn session_state(
    host: &HostIdentity,
    conn: &dyn HostConnection,
    authority: &dyn SessionAuthority,
) -> Option<SessionProbe> {
    let pairs = match conn.query_credentials().await {
        Ok(pairs) if !pairs.is_empty() => pairs,
        Ok(_) => return Some(SessionProbe::RebootRequired),
        Err(e) => {
            debug!(host = %host.name, error = %e, "Credential source unavailable");
            return Some(SessionProbe::RebootRequired);
        }
    };

    let mut answered = false;
    for pair in &pairs {
        match authority.latest_session(pair).await {
            Ok(Some(session)) if session.status.is_live() => {
                return Some(SessionProbe::Busy {
                    status: session.status,
                });
            }
            Ok(_) => answered = true,
            Err(e) => debug!(host = %host.name, error = %e, "Session check failed"),
        }
    }

    answered.then_some(SessionProbe::Idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use warden_api::{CredentialPair, DESKTOP_PRODUCT_ID, SessionStatus};
    use warden_authority::{MockAuthority, mock_session};
    use warden_host_api::{HostResult, MockConnection, MockConnector, MockHostState, MockInspector};

    fn hosts(n: usize) -> Vec<HostIdentity> {
        (0..n)
            .map(|i| {
                HostIdentity::new(
                    format!("PC-{:02}", i + 1),
                    format!("10.0.0.{}", i + 1),
                    "admin",
                    "",
                )
            })
            .collect()
    }

    /// Connector that tracks how many connects are in flight
    struct SlowConnector {
        state: Arc<MockHostState>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl HostConnector for SlowConnector {
        async fn connect(&self, _host: &HostIdentity) -> HostResult<Box<dyn HostConnection>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection::new(self.state.clone())))
        }
    }

    #[tokio::test]
    async fn test_sweep_respects_concurrency_limit() {
        let connector = Arc::new(SlowConnector {
            state: Arc::new(MockHostState::default()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let prober = DiagnosticProber::new(
            connector.clone(),
            Arc::new(MockInspector::new(Some(true), Some(true))),
            Arc::new(MockAuthority::new()),
            2,
        );

        prober.sweep(&hosts(6)).await;

        assert!(connector.peak.load(Ordering::SeqCst) <= 2);
        let diag = prober.get(&HostName::new("PC-06")).await;
        assert_eq!(diag.ssh_ok, Some(true));
    }

    #[tokio::test]
    async fn test_failed_check_keeps_other_fields() {
        let connector = Arc::new(MockConnector::with_credentials(vec![CredentialPair::new(
            "s1", "t1",
        )]));
        let authority = Arc::new(MockAuthority::new());
        authority.script("s1", [Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Active))]);
        let prober = DiagnosticProber::new(
            connector,
            Arc::new(MockInspector::new(None, Some(false))),
            authority,
            4,
        );

        let host = hosts(1);
        prober.sweep(&host).await;
        let diag = prober.get(&host[0].name).await;

        assert_eq!(diag.ssh_ok, Some(true));
        assert_eq!(diag.shadow_mode, None);
        assert_eq!(diag.restrictions_ok, Some(false));
        assert_eq!(
            diag.session_state,
            Some(SessionProbe::Busy {
                status: SessionStatus::Active
            })
        );
        assert!(diag.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let connector = Arc::new(MockConnector::new());
        *connector.fail_connect.lock().unwrap() = true;
        let prober = DiagnosticProber::new(
            connector,
            Arc::new(MockInspector::new(Some(true), Some(true))),
            Arc::new(MockAuthority::new()),
            4,
        );

        let host = hosts(1);
        prober.sweep(&host).await;
        let diag = prober.get(&host[0].name).await;

        assert_eq!(diag.ssh_ok, Some(false));
        assert!(diag.shadow_mode.is_none());
        assert!(diag.session_state.is_none());
    }

    #[tokio::test]
    async fn test_probe_never_runs_actions() {
        let connector = Arc::new(MockConnector::with_credentials(vec![]));
        let prober = DiagnosticProber::new(
            connector.clone(),
            Arc::new(MockInspector::new(Some(false), Some(true))),
            Arc::new(MockAuthority::new()),
            4,
        );

        let host = hosts(1);
        prober.sweep(&host).await;

        assert!(connector.commands().is_empty());
        assert_eq!(
            prober.get(&host[0].name).await.session_state,
            Some(SessionProbe::RebootRequired)
        );
    }
}
