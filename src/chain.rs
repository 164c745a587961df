use alloy::eips::BlockId;
use alloy::network::Ethereum;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::reqwest::Url;
use alloy::transports::TransportError;
use async_trait::async_trait;

use crate::error::{ChainError, ConfigError};

/// Provider messages meaning "the result set exceeds the provider's fixed cap".
const TOO_MANY_RESULTS_MARKERS: [&str; 3] = [
    "more than 10000 results",
    "query returned more than",
    "log response size exceeded",
];

pub fn is_too_many_results(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    TOO_MANY_RESULTS_MARKERS.iter().any(|needle| msg.contains(needle))
}

/// The chain RPC surface both engines consume.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Every log emitted by `contract` in `[from_block, to_block]`, all event kinds.
    async fn contract_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError>;

    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError>;

    /// Native balance in wei at `block`.
    async fn balance_at(&self, owner: Address, block: u64) -> Result<U256, ChainError>;
}

fn classify(e: TransportError) -> ChainError {
    let message = e.to_string();
    if is_too_many_results(&message) {
        ChainError::TooManyResults(message)
    } else {
        ChainError::Rpc(message)
    }
}

pub struct RpcChain {
    provider: DynProvider<Ethereum>,
}

impl RpcChain {
    pub fn new(provider: DynProvider<Ethereum>) -> Self {
        Self { provider }
    }

    pub fn connect_http(rpc_url: &str) -> Result<Self, ConfigError> {
        let url = rpc_url.parse::<Url>().map_err(|e| ConfigError::Invalid {
            key: "RPC_URL",
            reason: format!("{e}"),
        })?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self::new(provider))
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(classify)
    }

    async fn contract_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(contract)
            .from_block(from_block)
            .to_block(to_block);
        self.provider.get_logs(&filter).await.map_err(classify)
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError> {
        let block_data = self.provider.get_block_by_number(block.into()).await
            .map_err(classify)?
            .ok_or(ChainError::BlockNotFound(block))?;
        Ok(block_data.header.timestamp)
    }

    async fn balance_at(&self, owner: Address, block: u64) -> Result<U256, ChainError> {
        self.provider
            .get_balance(owner)
            .block_id(BlockId::number(block))
            .await
            .map_err(classify)
    }
}
