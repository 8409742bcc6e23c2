//! Per-host credential and classification cache

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{Classification, CredentialPair, Session};
use warden_authority::SessionAuthority;
use warden_host_api::CredentialSource;
use warden_store::ClassificationStore;
use warden_util::{HostName, ProductId, TtlMap};

use crate::{CycleError, CycleResult};

/// Credential pairs are held for the one host this cache serves
const CREDENTIAL_CAPACITY: usize = 10;

/// Products seen within one TTL; sized for a busy host's catalog
const CLASSIFICATION_CAPACITY: usize = 256;

/// Credential pairs of one host plus a layered desktop classification cache.
///
/// Classification consults the persisted catalog, then the in-memory layer,
/// then the authority, writing a network answer back to both layers.
pub struct CredentialCache {
    host: HostName,
    authority: Arc<dyn SessionAuthority>,
    catalog: Arc<dyn ClassificationStore>,
    servers: TtlMap<HostName, Vec<CredentialPair>>,
    active: Option<CredentialPair>,
    classifications: TtlMap<ProductId, bool>,
}

impl CredentialCache {
    pub fn new(
        host: HostName,
        authority: Arc<dyn SessionAuthority>,
        catalog: Arc<dyn ClassificationStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            host,
            authority,
            catalog,
            servers: TtlMap::new(CREDENTIAL_CAPACITY, ttl),
            active: None,
            classifications: TtlMap::new(CLASSIFICATION_CAPACITY, ttl),
        }
    }

    pub fn authority(&self) -> &Arc<dyn SessionAuthority> {
        &self.authority
    }

    /// Cached pairs, refreshed from `source` once they expire
    pub async fn get_servers<S>(&mut self, source: &S) -> CycleResult<Vec<CredentialPair>>
    where
        S: CredentialSource + ?Sized,
    {
        if let Some(pairs) = self.servers.get(&self.host) {
            return Ok(pairs.clone());
        }
        self.refresh(source).await
    }

    /// Query the host's credential source and replace the cached pairs.
    ///
    /// An unreachable source or an empty answer is `RebootRequired`.
    pub async fn refresh<S>(&mut self, source: &S) -> CycleResult<Vec<CredentialPair>>
    where
        S: CredentialSource + ?Sized,
    {
        let pairs = match source.query_credentials().await {
            Ok(pairs) => pairs,
            Err(e) => {
                info!(host = %self.host, error = %e, "Credential source unavailable");
                return Err(CycleError::RebootRequired);
            }
        };

        if pairs.is_empty() {
            info!(host = %self.host, "No credential pairs registered");
            return Err(CycleError::RebootRequired);
        }

        debug!(host = %self.host, count = pairs.len(), "Credential pairs refreshed");
        self.servers.insert(self.host.clone(), pairs.clone());
        Ok(pairs)
    }

    /// Drop cached pairs and the selection
    pub fn invalidate(&mut self) {
        self.servers.remove(&self.host);
        self.active = None;
    }

    /// Pin the pair used for the rest of the cycle
    pub fn set_active(&mut self, pair: CredentialPair) {
        debug!(host = %self.host, server_id = %pair.server_id.short(), "Credential pair selected");
        self.active = Some(pair);
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Selected pair, defaulting to the first discovered one
    pub fn selected(&mut self) -> Option<CredentialPair> {
        if let Some(pair) = &self.active {
            return Some(pair.clone());
        }
        self.servers
            .get(&self.host)
            .and_then(|pairs| pairs.first().cloned())
    }

    pub fn auth_token(&mut self) -> Option<String> {
        self.selected().map(|p| p.auth_token)
    }

    pub fn server_id(&mut self) -> Option<warden_util::ServerId> {
        self.selected().map(|p| p.server_id)
    }

    /// Whether a session is a desktop session
    pub async fn classify(&mut self, session: &Session, auth_token: &str) -> CycleResult<bool> {
        if session.is_plain_desktop() {
            return Ok(true);
        }

        let product_id = session.product_id;

        if let Classification::Known(value) = self.catalog.lookup(&product_id) {
            self.classifications.insert(product_id, value);
            return Ok(value);
        }

        if let Some(value) = self.classifications.get(&product_id) {
            return Ok(*value);
        }

        let info = self.authority.product_info(&product_id, auth_token).await?;
        info!(
            host = %self.host,
            product_id = %product_id,
            title = %info.title,
            use_default_desktop = info.use_default_desktop,
            "Product classified"
        );

        self.classifications.insert(product_id, info.use_default_desktop);
        if let Err(e) = self
            .catalog
            .record(product_id, &info.title, info.use_default_desktop)
        {
            warn!(product_id = %product_id, error = %e, "Failed to persist classification");
        }

        Ok(info.use_default_desktop)
    }
}
