//! Store trait definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_api::{Classification, ProductListItem};
use warden_util::ProductId;

use crate::StoreResult;

/// Persisted product classification layer
///
/// Shared by all workers of a fleet. Reads are concurrent, writes rewrite the
/// backing file in full.
pub trait ClassificationStore: Send + Sync {
    /// Classification currently held for a product
    fn lookup(&self, product_id: &ProductId) -> Classification;

    /// Record a concrete classification learned from the authority
    fn record(&self, product_id: ProductId, title: &str, is_desktop: bool) -> StoreResult<()>;

    /// Whether the last bulk refresh is missing or older than `max_age`
    fn needs_refresh(&self, max_age: Duration) -> bool;

    /// Merge a full product list.
    ///
    /// Titles are updated, concrete classifications are kept and new
    /// products are added as unknown. Returns the number of new products.
    fn refresh(&self, items: &[ProductListItem]) -> StoreResult<usize>;

    /// Time of the last bulk refresh
    fn last_refresh(&self) -> Option<DateTime<Utc>>;

    /// Number of products in the catalog
    fn product_count(&self) -> usize;
}

/// One catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub title: String,
    #[serde(default)]
    pub use_default_desktop: Classification,
}
