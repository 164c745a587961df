use std::cmp::min;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::info;

use crate::chain::ChainClient;
use crate::config::CrawlerSettings;
use crate::error::CrawlError;
use crate::ledger::Ledger;

/// Inclusive block range `[from_block, to_block]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self { from_block, to_block }
    }

    /// `to - from`; zero for a single-block range.
    pub fn width(&self) -> u64 {
        self.to_block.saturating_sub(self.from_block)
    }

    pub fn block_count(&self) -> u64 {
        self.width() + 1
    }

    /// Cursor value once this range is accounted for.
    pub fn next_block(&self) -> u64 {
        self.to_block + 1
    }
}

/// `min(from + window, head - depth)`, never below `from`.
pub fn calculate_to_block(from_block: u64, head: u64, window_size: u64, confirmation_depth: u64) -> u64 {
    let to_block = min(
        from_block.saturating_add(window_size),
        head.saturating_sub(confirmation_depth),
    );
    to_block.max(from_block)
}

/// Stored cursor, or the configured start block (persisted as the new cursor).
pub async fn determine_from_block(ledger: &Arc<Ledger>, settings: &CrawlerSettings) -> Result<u64, CrawlError> {
    let contract = settings.contract;
    let start_block = settings.start_block;
    let (block, created) = ledger
        .run_blocking(move |l| match l.find_cursor(contract)? {
            Some(block) => Ok((block, false)),
            None => {
                l.save_cursor(contract, start_block)?;
                Ok((start_block, true))
            }
        })
        .await?;
    if created {
        info!("[Crawler] Initialized latest block at {}", block);
    }
    Ok(block)
}

/// Polls the chain head until `head >= from + confirmation_depth`.
pub async fn wait_for_valid_head(
    chain: &dyn ChainClient,
    from_block: u64,
    settings: &CrawlerSettings,
) -> Result<u64, CrawlError> {
    let required = from_block.saturating_add(settings.confirmation_depth);
    loop {
        let head = chain.block_number().await?;
        if head >= required {
            return Ok(head);
        }
        info!("[Crawler] Waiting for valid block. Current: {}, Required: {}", head, required);
        sleep(settings.idle_delay).await;
    }
}

pub async fn plan_range(
    chain: &dyn ChainClient,
    ledger: &Arc<Ledger>,
    settings: &CrawlerSettings,
) -> Result<BlockRange, CrawlError> {
    let from_block = determine_from_block(ledger, settings).await?;
    let head = wait_for_valid_head(chain, from_block, settings).await?;
    let to_block = calculate_to_block(from_block, head, settings.window_size, settings.confirmation_depth);
    Ok(BlockRange::new(from_block, to_block))
}
