pub mod block;
pub mod cache;
pub mod fetch;
pub mod owners;
pub mod retry;
pub mod validate;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::chain::ChainClient;
use crate::error::BalanceError;
use crate::index_store::IndexStore;
use crate::ledger::Ledger;
use fetch::{BalanceFetcher, BalancePipeline, PipelineParams};
use retry::RetryParams;

/// Owner address → ether balance as an exact decimal string.
pub type OwnerBalances = BTreeMap<Address, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub block_number: u64,
    pub owners: OwnerBalances,
}

/// Answers "who held the collection, and with how much ETH, at time T".
pub struct BalanceService {
    ledger: Arc<Ledger>,
    index: Arc<dyn IndexStore>,
    fetcher: Arc<dyn BalanceFetcher>,
    contract: Address,
    save_block_margin: u64,
    retry: RetryParams,
}

impl BalanceService {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        index: Arc<dyn IndexStore>,
        contract: Address,
        save_block_margin: u64,
    ) -> Self {
        let pipeline = BalancePipeline::new(chain, PipelineParams::default());
        Self::with_fetcher(Arc::new(pipeline), ledger, index, contract, save_block_margin, RetryParams::default())
    }

    pub fn with_fetcher(
        fetcher: Arc<dyn BalanceFetcher>,
        ledger: Arc<Ledger>,
        index: Arc<dyn IndexStore>,
        contract: Address,
        save_block_margin: u64,
        retry: RetryParams,
    ) -> Self {
        Self { ledger, index, fetcher, contract, save_block_margin, retry }
    }

    pub async fn resolve(&self, timestamp_ms: i64, force_refresh: bool) -> Result<BalanceSnapshot, BalanceError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.resolve_at(timestamp_ms, force_refresh, now_ms).await
    }

    /// `resolve` with an explicit clock.
    pub async fn resolve_at(
        &self,
        timestamp_ms: i64,
        force_refresh: bool,
        now_ms: i64,
    ) -> Result<BalanceSnapshot, BalanceError> {
        validate::validate_timestamp(timestamp_ms, now_ms)?;

        let block_number = block::resolve_block(self.index.as_ref(), timestamp_ms).await?;
        info!("[Balances] Timestamp {} resolved to block {}", timestamp_ms, block_number);

        if !force_refresh {
            if let Some(owners) = cache::cached_snapshot(self.index.as_ref(), block_number).await {
                return Ok(BalanceSnapshot { block_number, owners });
            }
        }

        let owners = owners::distinct_owners(&self.ledger, block_number).await?;
        info!("[Balances] {} distinct owners at block {}", owners.len(), block_number);

        let fetched = self.fetcher.fetch_balances(&owners, block_number).await?;
        let balances =
            retry::recover_missing(self.fetcher.as_ref(), &owners, fetched, block_number, &self.retry).await?;

        let contract = self.contract;
        let cursor = self.ledger.run_blocking(move |l| l.find_cursor(contract)).await?;
        let complete = retry::missing_owners(&owners, &balances).is_empty();
        if cache::should_cache(cursor, block_number, self.save_block_margin, complete) {
            cache::store_snapshot(self.index.as_ref(), block_number, &balances).await;
        }

        Ok(BalanceSnapshot { block_number, owners: balances })
    }
}
