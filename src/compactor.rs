use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::store::Store;

const TICK: Duration = Duration::from_secs(30);

/// Background task that compacts a store's WAL once enough appends have
/// accumulated since the last compaction.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(store: &Store, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(business = %store.business_id(), appends, "compaction not due");
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            info!(business = %store.business_id(), appends, "compacted WAL");
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            warn!(business = %store.business_id(), "WAL compaction failed: {e}");
            false
        }
    }
}
