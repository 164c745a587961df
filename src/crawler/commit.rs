use alloy::primitives::Address;
use std::sync::Arc;
use tracing::{error, info};

use crate::crawler::extract::Extracted;
use crate::crawler::range::BlockRange;
use crate::error::CrawlError;
use crate::index_store::IndexStore;
use crate::ledger::Ledger;

/// Nothing to keep atomic with the cursor, so it moves on its own.
pub async fn advance_cursor(ledger: &Arc<Ledger>, contract: Address, range: BlockRange) -> Result<(), CrawlError> {
    let next_block = range.next_block();
    ledger.run_blocking(move |l| l.save_cursor(contract, next_block)).await?;
    info!("[Crawler] No events to process, updated latest block to {}", range.next_block());
    Ok(())
}

/// Appends the transfers and advances the cursor in one transaction, then publishes the
/// block timestamps. The index is only written once the ledger commit has succeeded.
pub async fn commit_transfers(
    ledger: &Arc<Ledger>,
    index: &dyn IndexStore,
    contract: Address,
    range: BlockRange,
    extracted: &Extracted,
) -> Result<usize, CrawlError> {
    let transfers = extracted.transfers.clone();
    let next_block = range.next_block();
    let saved = ledger
        .run_blocking(move |l| {
            l.unit_of_work(|tx| {
                let saved = Ledger::bulk_insert_transfers(tx, &transfers)?;
                Ledger::update_cursor_in_transaction(tx, contract, next_block)?;
                Ok(saved)
            })
        })
        .await
        .inspect_err(|e| error!("[Crawler] Transaction failed: {}", e))?;
    info!(
        "[Crawler] Saved {} transfer events, latest block now {}",
        saved,
        range.next_block()
    );

    let block_times = extracted.block_times();
    index.publish_block_timestamps(&block_times).await?;
    info!("[Crawler] Cached {} block timestamps", block_times.len());

    Ok(saved)
}
