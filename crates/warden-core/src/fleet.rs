//! In-process fleet supervisor

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use warden_api::HostIdentity;
use warden_authority::SessionAuthority;
use warden_config::FleetConfig;
use warden_store::ClassificationStore;

use crate::{HostWorker, WorkerDeps, WorkerSettings};

/// Runs one [`HostWorker`] task per enabled host and owns the shared
/// authority client and classification catalog.
pub struct FleetSupervisor {
    hosts: Vec<HostIdentity>,
    settings: WorkerSettings,
    deps: WorkerDeps,
    catalog_refresh: Duration,
    stop_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl FleetSupervisor {
    pub fn new(config: &FleetConfig, deps: WorkerDeps) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            hosts: config.enabled_hosts().cloned().collect(),
            settings: WorkerSettings::from_config(config),
            deps,
            catalog_refresh: config.service.catalog_refresh,
            stop_tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn hosts(&self) -> &[HostIdentity] {
        &self.hosts
    }

    /// Refresh the catalog once if it is older than the refresh period.
    ///
    /// Returns true if a refresh was stored. Failures leave the catalog as is.
    pub async fn refresh_catalog_if_stale(&self) -> bool {
        refresh_catalog(
            &*self.deps.authority,
            &*self.deps.catalog,
            self.catalog_refresh,
        )
        .await
    }

    /// Run every worker until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) {
        self.refresh_catalog_if_stale().await;

        let mut workers = JoinSet::new();
        for host in &self.hosts {
            let worker = HostWorker::new(host.clone(), self.settings.clone(), self.deps.clone());
            workers.spawn(worker.run(self.stop_tx.subscribe()));
        }
        info!(workers = self.hosts.len(), "Fleet started");

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        self.close().await;
        info!("Fleet stopped");
    }

    /// Signal every worker to stop
    pub fn shutdown(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Stop workers and release shared resources. Safe to call repeatedly.
    pub async fn close(&self) {
        self.shutdown();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.deps.authority.close().await;
        debug!("Shared resources closed");
    }
}

/// Bulk-refresh `catalog` from the authority's product list if it is older
/// than `period`. Returns true if a refresh was stored.
pub async fn refresh_catalog(
    authority: &dyn SessionAuthority,
    catalog: &dyn ClassificationStore,
    period: Duration,
) -> bool {
    if !catalog.needs_refresh(period) {
        debug!(products = catalog.product_count(), "Catalog is fresh");
        return false;
    }

    match authority.product_list().await {
        Ok(Some(items)) => match catalog.refresh(&items) {
            Ok(added) => {
                info!(total = items.len(), added, "Catalog refreshed from product list");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to store refreshed catalog");
                false
            }
        },
        Ok(None) => {
            debug!("No product list endpoint, classification stays lazy");
            false
        }
        Err(e) => {
            warn!(error = %e, "Failed to fetch product list");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;
    use warden_api::{CredentialPair, ProductListItem, SessionStatus, DESKTOP_PRODUCT_ID};
    use warden_authority::{MockAuthority, mock_session};
    use warden_config::parse_config;
    use warden_host_api::{MockActions, MockConnector};
    use warden_store::JsonCatalog;
    use warden_util::ProductId;

    fn config() -> FleetConfig {
        parse_config(
            r#"
            config_version = 1

            [service]
            poll_interval_idle_secs = 0.005
            poll_interval_active_secs = 0.005
            reconnect_delay_secs = 0.005
            error_delay_secs = 0.005

            [defaults]
            login = "admin"

            [[hosts]]
            address = "10.0.0.1"

            [[hosts]]
            address = "10.0.0.2"

            [[hosts]]
            address = "10.0.0.3"
            enabled = false
        "#,
        )
        .unwrap()
    }

    struct Fixture {
        authority: Arc<MockAuthority>,
        catalog: Arc<JsonCatalog>,
        actions: Arc<MockActions>,
        fleet: Arc<FleetSupervisor>,
    }

    fn fixture() -> Fixture {
        let authority = Arc::new(MockAuthority::new());
        let catalog = Arc::new(JsonCatalog::in_memory());
        let connector = Arc::new(MockConnector::with_credentials(vec![CredentialPair::new(
            "s1", "t1",
        )]));
        let actions = Arc::new(MockActions::new());
        let fleet = Arc::new(FleetSupervisor::new(
            &config(),
            WorkerDeps {
                authority: authority.clone(),
                catalog: catalog.clone(),
                connector,
                actions: actions.clone(),
            },
        ));
        Fixture {
            authority,
            catalog,
            actions,
            fleet,
        }
    }

    #[tokio::test]
    async fn test_only_enabled_hosts_run() {
        let f = fixture();
        assert_eq!(f.fleet.hosts().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_catalog_refreshed_once() {
        let f = fixture();
        f.authority.set_product_list(Some(vec![ProductListItem {
            product_id: ProductId::from_uuid(Uuid::from_u128(1)),
            title: "Game".into(),
        }]));

        assert!(f.fleet.refresh_catalog_if_stale().await);
        assert!(!f.fleet.refresh_catalog_if_stale().await);
        assert_eq!(f.catalog.product_count(), 1);
        assert_eq!(f.authority.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_list_leaves_catalog() {
        let f = fixture();
        assert!(!f.fleet.refresh_catalog_if_stale().await);
        assert_eq!(f.catalog.product_count(), 0);
    }

    #[tokio::test]
    async fn test_workers_run_and_close_once() {
        let f = fixture();
        f.authority.script(
            "s1",
            [
                None,
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::New)),
                Some(mock_session(DESKTOP_PRODUCT_ID, SessionStatus::Finished)),
                None,
            ],
        );

        let fleet = f.fleet.clone();
        let task = tokio::spawn(async move { fleet.run().await });

        assert!(f.actions.wait_for_after(1, Duration::from_secs(5)).await);
        f.fleet.close().await;
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        f.fleet.close().await;

        assert_eq!(f.authority.close_calls.load(Ordering::SeqCst), 1);
    }
}
