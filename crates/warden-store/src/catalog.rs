//! JSON file catalog implementation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use warden_api::{Classification, ProductListItem};
use warden_util::ProductId;

use crate::{CatalogEntry, ClassificationStore, StoreResult};

/// On-disk layout of the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    pub products: BTreeMap<ProductId, CatalogEntry>,
}

impl CatalogFile {
    /// Take concrete values from `other` that this file lacks.
    ///
    /// Known classifications are never demoted to unknown.
    fn absorb(&mut self, other: CatalogFile) {
        for (id, theirs) in other.products {
            match self.products.get_mut(&id) {
                Some(ours) => {
                    if !ours.use_default_desktop.is_known() && theirs.use_default_desktop.is_known()
                    {
                        ours.use_default_desktop = theirs.use_default_desktop;
                    }
                }
                None => {
                    self.products.insert(id, theirs);
                }
            }
        }

        self.last_refresh = match (self.last_refresh, other.last_refresh) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Classification catalog backed by a JSON file
pub struct JsonCatalog {
    path: Option<PathBuf>,
    data: RwLock<CatalogFile>,
}

impl JsonCatalog {
    /// Open the catalog at `path`.
    ///
    /// A missing or unreadable file yields an empty catalog.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = read_file(&path).unwrap_or_default();
        info!(
            path = %path.display(),
            products = data.products.len(),
            "Classification catalog loaded"
        );

        Self {
            path: Some(path),
            data: RwLock::new(data),
        }
    }

    /// Create a catalog that is never written to disk (for testing)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(CatalogFile::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Title recorded for a product
    pub fn title(&self, product_id: &ProductId) -> Option<String> {
        self.read().products.get(product_id).map(|e| e.title.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogFile> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge what is on disk into `data`, then rewrite the file
    fn save(&self, data: &mut CatalogFile) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(on_disk) = read_file(path) {
            data.absorb(on_disk);
        }

        let json = serde_json::to_vec_pretty(&*data)?;
        warden_util::write_atomic(path, &json)?;
        debug!(path = %path.display(), products = data.products.len(), "Catalog saved");
        Ok(())
    }
}

impl ClassificationStore for JsonCatalog {
    fn lookup(&self, product_id: &ProductId) -> Classification {
        self.read()
            .products
            .get(product_id)
            .map(|e| e.use_default_desktop)
            .unwrap_or_default()
    }

    fn record(&self, product_id: ProductId, title: &str, is_desktop: bool) -> StoreResult<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.products.insert(
            product_id,
            CatalogEntry {
                title: title.to_string(),
                use_default_desktop: Classification::Known(is_desktop),
            },
        );
        debug!(product_id = %product_id, title, is_desktop, "Classification recorded");
        self.save(&mut data)
    }

    fn needs_refresh(&self, max_age: Duration) -> bool {
        match self.read().last_refresh {
            Some(at) => warden_util::is_older_than(at, max_age, warden_util::now()),
            None => true,
        }
    }

    fn refresh(&self, items: &[ProductListItem]) -> StoreResult<usize> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;

        for item in items {
            match data.products.get_mut(&item.product_id) {
                Some(entry) => entry.title = item.title.clone(),
                None => {
                    data.products.insert(
                        item.product_id,
                        CatalogEntry {
                            title: item.title.clone(),
                            use_default_desktop: Classification::Unknown,
                        },
                    );
                    added += 1;
                }
            }
        }

        data.last_refresh = Some(warden_util::now());
        info!(total = data.products.len(), added, "Catalog refreshed");
        self.save(&mut data)?;
        Ok(added)
    }

    fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.read().last_refresh
    }

    fn product_count(&self) -> usize {
        self.read().products.len()
    }
}

fn read_file(path: &Path) -> Option<CatalogFile> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read catalog");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Catalog file is corrupt, starting empty");
            None
        }
    }
}
