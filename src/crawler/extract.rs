use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::chain::ChainClient;
use crate::contracts::IERC721;
use crate::error::ChainError;
use crate::index_store::BlockTime;
use crate::ledger::TransferRecord;

/// Block number → timestamp, scoped to one crawl cycle.
pub type TimestampMemo = BTreeMap<u64, u64>;

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub transfers: Vec<TransferRecord>,
    pub block_timestamps: TimestampMemo,
}

impl Extracted {
    pub fn block_times(&self) -> Vec<BlockTime> {
        self.block_timestamps
            .iter()
            .map(|(&block, &timestamp)| BlockTime { block, timestamp })
            .collect()
    }
}

/// ERC-721 `Transfer`: signature topic plus three indexed arguments.
/// ERC-20 transfers share the signature but carry only two indexed topics.
pub fn is_transfer_event(log: &Log) -> bool {
    let topics = log.topics();
    !log.removed && topics.len() == 4 && topics[0] == IERC721::Transfer::SIGNATURE_HASH
}

async fn block_timestamp(
    chain: &dyn ChainClient,
    log: &Log,
    block_number: u64,
    memo: &mut TimestampMemo,
) -> Result<u64, ChainError> {
    if let Some(&ts) = memo.get(&block_number) {
        return Ok(ts);
    }
    let ts = match log.block_timestamp {
        Some(ts) => ts,
        None => chain.block_timestamp(block_number).await?,
    };
    memo.insert(block_number, ts);
    Ok(ts)
}

/// Keeps only ownership transfers and resolves each block's timestamp once per cycle.
pub async fn extract_transfers(chain: &dyn ChainClient, logs: &[Log]) -> Result<Extracted, ChainError> {
    info!("[Crawler] Processing {} events", logs.len());
    let mut extracted = Extracted::default();

    for log in logs.iter().filter(|l| is_transfer_event(l)) {
        let block_number = log.block_number.ok_or(ChainError::MalformedLog("missing block number"))?;
        let tx_hash = log.transaction_hash.ok_or(ChainError::MalformedLog("missing transaction hash"))?;
        let log_index = log.log_index.ok_or(ChainError::MalformedLog("missing log index"))?;
        let block_timestamp = block_timestamp(chain, log, block_number, &mut extracted.block_timestamps).await?;

        let topics = log.topics();
        let record = TransferRecord {
            from: Address::from_slice(&topics[1].0[12..]),
            to: Address::from_slice(&topics[2].0[12..]),
            token_id: U256::from_be_bytes(topics[3].0),
            tx_hash,
            log_index,
            block_number,
            block_timestamp,
        };
        debug!(
            "[Crawler] Processed Transfer event: tokenId={}, from={}, to={}, block={}",
            record.token_id, record.from, record.to, record.block_number
        );
        extracted.transfers.push(record);
    }

    info!(
        "[Crawler] Successfully processed {} transfer events from {} total events",
        extracted.transfers.len(),
        logs.len()
    );
    Ok(extracted)
}
