use tracing::{info, warn};

use crate::balances::OwnerBalances;
use crate::index_store::IndexStore;

/// A cache read that fails is treated as a miss.
pub async fn cached_snapshot(index: &dyn IndexStore, block: u64) -> Option<OwnerBalances> {
    match index.get_snapshot(block).await {
        Ok(Some(owners)) => {
            info!("[Balances] Serving cached snapshot for block {}", block);
            Some(owners)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("[Balances] Snapshot cache read failed for block {}: {}", block, e);
            None
        }
    }
}

/// Only complete snapshots of blocks well behind the crawl cursor are stable enough
/// to cache.
pub fn should_cache(cursor: Option<u64>, block: u64, margin: u64, complete: bool) -> bool {
    match cursor {
        Some(cursor) => complete && cursor.saturating_sub(block) > margin,
        None => false,
    }
}

pub async fn store_snapshot(index: &dyn IndexStore, block: u64, owners: &OwnerBalances) {
    match index.put_snapshot(block, owners).await {
        Ok(()) => info!("[Balances] Cached snapshot for block {} ({} owners)", block, owners.len()),
        Err(e) => warn!("[Balances] Failed to cache snapshot for block {}: {}", block, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_only_complete_snapshots_past_the_margin() {
        assert!(should_cache(Some(150), 100, 20, true));
        assert!(!should_cache(Some(120), 100, 20, true));
        assert!(!should_cache(Some(110), 100, 20, true));
        assert!(!should_cache(Some(150), 100, 20, false));
        assert!(!should_cache(None, 100, 20, true));
        assert!(!should_cache(Some(50), 100, 20, true));
    }
}
