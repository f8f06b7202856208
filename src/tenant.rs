use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::compactor;
use crate::limits::*;
use crate::model::BusinessId;
use crate::store::Store;

/// Per-business stores. Each business gets its own Store, WAL, and
/// compactor, opened on first use.
pub struct TenantManager {
    stores: DashMap<BusinessId, Arc<Store>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            stores: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily open the store for a business.
    pub fn get_or_open(&self, business_id: BusinessId) -> std::io::Result<Arc<Store>> {
        if let Some(store) = self.stores.get(&business_id) {
            return Ok(store.value().clone());
        }
        if self.stores.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        let store = match self.stores.entry(business_id) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{business_id}.wal"));
                let store = Arc::new(Store::new(business_id, wal_path)?);
                e.insert(store.clone());
                store
            }
        };

        let compactor_store = store.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_store, threshold).await;
        });

        info!(business = %business_id, "opened tenant store");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.stores.len() as f64);
        Ok(store)
    }
}
