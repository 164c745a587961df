use alloy::primitives::Address;
use std::sync::Arc;

use crate::error::BalanceError;
use crate::ledger::Ledger;

/// Distinct current owners at `snapshot_block`, from one window query on the blocking pool.
pub async fn distinct_owners(ledger: &Arc<Ledger>, snapshot_block: u64) -> Result<Vec<Address>, BalanceError> {
    Ok(ledger.run_blocking(move |l| l.distinct_owners(snapshot_block)).await?)
}
