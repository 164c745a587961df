use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::balances::OwnerBalances;
use crate::chain::ChainClient;
use crate::error::{BalanceError, ChainError};

const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;
const ETHER_DECIMALS: usize = 18;

/// Wei as an exact decimal ether string: `0` → `"0"`, `1.5e18` → `"1.5"`.
pub fn format_ether(wei: U256) -> String {
    let unit = U256::from(WEI_PER_ETHER);
    let whole = wei / unit;
    let fraction = wei % unit;
    if fraction.is_zero() {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", fraction.to_string(), width = ETHER_DECIMALS);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Rate-limit and retry shape of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineParams {
    pub chunk_size: usize,
    pub batch_size: usize,
    pub chunk_delay: Duration,
    pub batch_delay: Duration,
    /// Extra attempts for a batch whose call as a whole failed.
    pub max_batch_retries: u32,
    pub batch_backoff: Backoff,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            batch_size: 100,
            chunk_delay: Duration::from_millis(500),
            batch_delay: Duration::from_millis(100),
            max_batch_retries: 3,
            batch_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

/// Splits owners into consecutive groups of at most `size`.
pub fn split_owners(owners: &[Address], size: usize) -> Vec<&[Address]> {
    owners.chunks(size.max(1)).collect()
}

/// Anything that can resolve a set of owner balances at a block. Missing keys mean
/// "unknown", never zero.
#[async_trait]
pub trait BalanceFetcher: Send + Sync {
    async fn fetch_balances(&self, owners: &[Address], block: u64) -> Result<OwnerBalances, BalanceError>;
}

#[derive(Debug)]
pub enum BalanceOutcome {
    Resolved { owner: Address, wei: U256 },
    Failed { owner: Address, error: ChainError },
}

pub struct BalancePipeline {
    chain: Arc<dyn ChainClient>,
    params: PipelineParams,
}

impl BalancePipeline {
    pub fn new(chain: Arc<dyn ChainClient>, params: PipelineParams) -> Self {
        Self { chain, params }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// One task per address; a failed address is an outcome, not an error. Only a task
    /// that could not be joined fails the batch.
    async fn fetch_batch(&self, batch: &[Address], block: u64) -> Result<Vec<BalanceOutcome>, JoinError> {
        let handles = batch.iter().map(|&owner| {
            let chain = Arc::clone(&self.chain);
            tokio::spawn(async move { (owner, chain.balance_at(owner, block).await) })
        });

        let mut outcomes = Vec::with_capacity(batch.len());
        for joined in join_all(handles).await {
            let outcome = match joined? {
                (owner, Ok(wei)) => BalanceOutcome::Resolved { owner, wei },
                (owner, Err(error)) => {
                    warn!("[Balances] Failed to get balance for {}: {}", owner, error);
                    BalanceOutcome::Failed { owner, error }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn fetch_batch_with_retry(
        &self,
        batch: &[Address],
        block: u64,
        chunk_number: usize,
        batch_number: usize,
    ) -> Vec<BalanceOutcome> {
        let max_attempts = self.params.max_batch_retries + 1;
        for attempt in 1..=max_attempts {
            debug!("[Balances] Chunk {} - Processing batch {} (attempt {})", chunk_number, batch_number, attempt);
            match self.fetch_batch(batch, block).await {
                Ok(outcomes) => return outcomes,
                Err(e) => {
                    warn!(
                        "[Balances] Chunk {} batch {} failed (attempt {}): {}",
                        chunk_number, batch_number, attempt, e
                    );
                    if attempt == max_attempts {
                        break;
                    }
                    sleep(self.params.batch_backoff.delay(attempt)).await;
                }
            }
        }
        error!("[Balances] Batch failed after {} attempts, returning empty results", max_attempts);
        Vec::new()
    }

    async fn fetch_chunk(
        &self,
        chunk: &[Address],
        block: u64,
        chunk_number: usize,
        total_chunks: usize,
    ) -> OwnerBalances {
        info!("[Balances] Processing chunk {}/{} with {} owners", chunk_number, total_chunks, chunk.len());
        let batches = split_owners(chunk, self.params.batch_size);
        let mut balances = OwnerBalances::new();

        for (i, batch) in batches.iter().enumerate() {
            for outcome in self.fetch_batch_with_retry(batch, block, chunk_number, i + 1).await {
                if let BalanceOutcome::Resolved { owner, wei } = outcome {
                    balances.insert(owner, format_ether(wei));
                }
            }
            if i + 1 < batches.len() {
                sleep(self.params.batch_delay).await;
            }
        }
        balances
    }

    pub async fn fetch(&self, owners: &[Address], block: u64) -> OwnerBalances {
        let chunks = split_owners(owners, self.params.chunk_size);
        info!(
            "[Balances] Processing {} chunks, max {} owners per chunk",
            chunks.len(),
            self.params.chunk_size
        );

        let mut balances = OwnerBalances::new();
        for (i, chunk) in chunks.iter().enumerate() {
            balances.extend(self.fetch_chunk(chunk, block, i + 1, chunks.len()).await);
            if i + 1 < chunks.len() {
                sleep(self.params.chunk_delay).await;
            }
        }

        info!("[Balances] Completed processing all chunks. Total balances retrieved: {}", balances.len());
        balances
    }
}

#[async_trait]
impl BalanceFetcher for BalancePipeline {
    async fn fetch_balances(&self, owners: &[Address], block: u64) -> Result<OwnerBalances, BalanceError> {
        Ok(self.fetch(owners, block).await)
    }
}
