use alloy::primitives::Address;
use alloy::rpc::types::Log;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::backoff::linear_delay;
use crate::chain::ChainClient;
use crate::crawler::range::BlockRange;
use crate::error::{ChainError, CrawlError};

pub const MAX_FETCH_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(2000);

/// Logs for the range actually fetched, which may be narrower than requested.
#[derive(Debug, Clone)]
pub struct FetchedEvents {
    pub logs: Vec<Log>,
    pub range: BlockRange,
}

/// Fetches contract logs for `requested`, halving the width (same start block) whenever
/// the provider reports too many results. Shrinking does not consume retry attempts;
/// other failures are retried with linear backoff up to [`MAX_FETCH_ATTEMPTS`].
pub async fn fetch_contract_events(
    chain: &dyn ChainClient,
    contract: Address,
    requested: BlockRange,
    min_block_range: u64,
) -> Result<FetchedEvents, CrawlError> {
    let from_block = requested.from_block;
    let mut width = requested.width();
    let mut failures = 0u32;

    loop {
        let range = BlockRange::new(from_block, from_block + width);
        info!(
            "[Crawler] Attempt {}/{}: Crawling {} blocks ({} to {})",
            failures + 1, MAX_FETCH_ATTEMPTS, range.block_count(), range.from_block, range.to_block
        );

        match chain.contract_logs(contract, range.from_block, range.to_block).await {
            Ok(logs) => {
                info!("[Crawler] Successfully retrieved {} events", logs.len());
                return Ok(FetchedEvents { logs, range });
            }
            Err(ChainError::TooManyResults(_)) => {
                let narrower = width / 2;
                if narrower < min_block_range {
                    return Err(CrawlError::RangeBelowFloor { width: narrower, min: min_block_range });
                }
                warn!(
                    "[Crawler] Too many results detected. Reducing block range from {} to {} blocks",
                    width + 1, narrower + 1
                );
                width = narrower;
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_FETCH_ATTEMPTS {
                    error!("[Crawler] All {} attempts failed", MAX_FETCH_ATTEMPTS);
                    return Err(CrawlError::RetriesExhausted { attempts: failures, source: e });
                }
                let delay = linear_delay(RETRY_BASE_DELAY, failures);
                warn!("[Crawler] Attempt {} failed: {}. Retrying in {:?}...", failures, e, delay);
                sleep(delay).await;
            }
        }
    }
}
