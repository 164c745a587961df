use crate::error::BalanceError;
use crate::index_store::IndexStore;

/// Nearest indexed block at or before a millisecond wall-clock timestamp.
/// Block timestamps are indexed in seconds, so the lookup uses `floor(ms / 1000)`.
pub async fn resolve_block(index: &dyn IndexStore, timestamp_ms: i64) -> Result<u64, BalanceError> {
    let seconds = u64::try_from(timestamp_ms.max(0) / 1000).unwrap_or_default();
    index
        .find_block_at_or_before(seconds)
        .await?
        .ok_or(BalanceError::BlockNotFound { timestamp: timestamp_ms })
}
