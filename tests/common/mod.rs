#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, Log as PrimitiveLog, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use nft_holders::balances::fetch::BalanceFetcher;
use nft_holders::balances::OwnerBalances;
use nft_holders::chain::ChainClient;
use nft_holders::config::CrawlerSettings;
use nft_holders::contracts::IERC721;
use nft_holders::error::{BalanceError, ChainError, IndexError};
use nft_holders::index_store::{BlockTime, IndexStore, LedgerIndex};
use nft_holders::ledger::Ledger;

/// 2021-01-01T00:00:00Z in seconds; block `n` is mined `12 * n` seconds later.
pub const GENESIS_TIMESTAMP: u64 = 1_609_459_200;

pub fn block_time(block: u64) -> u64 {
    GENESIS_TIMESTAMP + block * 12
}

pub fn contract() -> Address {
    Address::repeat_byte(0xC0)
}

pub fn wallet(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

pub fn one_ether() -> U256 {
    U256::from(1_000_000_000_000_000_000u128)
}

pub fn settings() -> CrawlerSettings {
    CrawlerSettings::new(contract())
}

pub fn ledger() -> Arc<Ledger> {
    Arc::new(Ledger::open_in_memory().unwrap())
}

pub fn tx_hash(block: u64, log_index: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[16..24].copy_from_slice(&block.to_be_bytes());
    bytes[24..].copy_from_slice(&log_index.to_be_bytes());
    B256::from(bytes)
}

fn rpc_log(address: Address, topics: Vec<B256>, data: Bytes, block: u64, log_index: u64) -> Log {
    Log {
        inner: PrimitiveLog { address, data: LogData::new_unchecked(topics, data) },
        block_hash: None,
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(tx_hash(block, log_index)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

pub fn transfer_log(from: Address, to: Address, token_id: u64, block: u64, log_index: u64) -> Log {
    let topics = vec![
        IERC721::Transfer::SIGNATURE_HASH,
        from.into_word(),
        to.into_word(),
        B256::from(U256::from(token_id).to_be_bytes::<32>()),
    ];
    rpc_log(contract(), topics, Bytes::new(), block, log_index)
}

pub fn approval_log(owner: Address, approved: Address, token_id: u64, block: u64, log_index: u64) -> Log {
    let topics = vec![
        IERC721::Approval::SIGNATURE_HASH,
        owner.into_word(),
        approved.into_word(),
        B256::from(U256::from(token_id).to_be_bytes::<32>()),
    ];
    rpc_log(contract(), topics, Bytes::new(), block, log_index)
}

/// Same signature as the ERC-721 event but with the amount in data.
pub fn fungible_transfer_log(from: Address, to: Address, amount: u64, block: u64, log_index: u64) -> Log {
    let topics = vec![IERC721::Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()];
    let data = Bytes::from(U256::from(amount).to_be_bytes::<32>().to_vec());
    rpc_log(contract(), topics, data, block, log_index)
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<Log>,
    /// Consumed one per `contract_logs` call before any logs are served.
    log_failures: VecDeque<ChainError>,
    /// Widths (`to - from`) above this are refused as too many results.
    max_log_width: Option<u64>,
    requested_ranges: Vec<(u64, u64)>,
    head_calls: usize,
    timestamp_calls: BTreeMap<u64, usize>,
    balances: HashMap<Address, U256>,
    /// Remaining failures per owner; `usize::MAX` fails forever.
    balance_failures: HashMap<Address, usize>,
    panic_owners: HashSet<Address>,
    balance_calls: Vec<(Address, u64)>,
}

/// Scripted in-memory chain.
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(head: u64) -> Arc<Self> {
        let chain = Self::default();
        chain.state.lock().unwrap().head = head;
        Arc::new(chain)
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn push_logs(&self, logs: impl IntoIterator<Item = Log>) {
        self.state.lock().unwrap().logs.extend(logs);
    }

    pub fn fail_next_log_query(&self, error: ChainError) {
        self.state.lock().unwrap().log_failures.push_back(error);
    }

    pub fn cap_log_width(&self, max_width: u64) {
        self.state.lock().unwrap().max_log_width = Some(max_width);
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().requested_ranges.clone()
    }

    pub fn head_calls(&self) -> usize {
        self.state.lock().unwrap().head_calls
    }

    pub fn timestamp_calls(&self) -> BTreeMap<u64, usize> {
        self.state.lock().unwrap().timestamp_calls.clone()
    }

    pub fn set_balance(&self, owner: Address, wei: U256) {
        self.state.lock().unwrap().balances.insert(owner, wei);
    }

    pub fn fail_balance(&self, owner: Address, times: usize) {
        self.state.lock().unwrap().balance_failures.insert(owner, times);
    }

    pub fn panic_on_balance(&self, owner: Address) {
        self.state.lock().unwrap().panic_owners.insert(owner);
    }

    pub fn balance_calls(&self) -> Vec<(Address, u64)> {
        self.state.lock().unwrap().balance_calls.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.head_calls += 1;
        Ok(state.head)
    }

    async fn contract_logs(&self, contract: Address, from_block: u64, to_block: u64) -> Result<Vec<Log>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.requested_ranges.push((from_block, to_block));
        if let Some(error) = state.log_failures.pop_front() {
            return Err(error);
        }
        if let Some(max) = state.max_log_width {
            if to_block - from_block > max {
                return Err(ChainError::TooManyResults("query returned more than 10000 results".into()));
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                log.address() == contract && block >= from_block && block <= to_block
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, ChainError> {
        let mut state = self.state.lock().unwrap();
        *state.timestamp_calls.entry(block).or_default() += 1;
        Ok(block_time(block))
    }

    async fn balance_at(&self, owner: Address, block: u64) -> Result<U256, ChainError> {
        let panics = {
            let mut state = self.state.lock().unwrap();
            state.balance_calls.push((owner, block));
            state.panic_owners.contains(&owner)
        };
        if panics {
            panic!("balance backend crashed for {owner}");
        }

        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.balance_failures.get_mut(&owner) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(ChainError::Rpc(format!("balance unavailable for {owner}")));
            }
        }
        Ok(state.balances.get(&owner).copied().unwrap_or(U256::ZERO))
    }
}

/// Records the ledger's transfer count at the moment timestamps are published.
pub struct ObservingIndex {
    inner: LedgerIndex,
    ledger: Arc<Ledger>,
    pub transfers_seen_at_publish: Mutex<Vec<u64>>,
}

impl ObservingIndex {
    pub fn new(ledger: Arc<Ledger>) -> Arc<Self> {
        Arc::new(Self {
            inner: LedgerIndex::new(ledger.clone()),
            ledger,
            transfers_seen_at_publish: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl IndexStore for ObservingIndex {
    async fn publish_block_timestamps(&self, entries: &[BlockTime]) -> Result<(), IndexError> {
        let seen = self.ledger.transfer_count().unwrap();
        self.transfers_seen_at_publish.lock().unwrap().push(seen);
        self.inner.publish_block_timestamps(entries).await
    }

    async fn find_block_at_or_before(&self, timestamp: u64) -> Result<Option<u64>, IndexError> {
        self.inner.find_block_at_or_before(timestamp).await
    }

    async fn get_snapshot(&self, block: u64) -> Result<Option<OwnerBalances>, IndexError> {
        self.inner.get_snapshot(block).await
    }

    async fn put_snapshot(&self, block: u64, owners: &OwnerBalances) -> Result<(), IndexError> {
        self.inner.put_snapshot(block, owners).await
    }
}

/// Store whose every operation fails.
pub struct BrokenIndex;

#[async_trait]
impl IndexStore for BrokenIndex {
    async fn publish_block_timestamps(&self, _entries: &[BlockTime]) -> Result<(), IndexError> {
        Err(IndexError::InvalidEntry("store offline".into()))
    }

    async fn find_block_at_or_before(&self, _timestamp: u64) -> Result<Option<u64>, IndexError> {
        Err(IndexError::InvalidEntry("store offline".into()))
    }

    async fn get_snapshot(&self, _block: u64) -> Result<Option<OwnerBalances>, IndexError> {
        Err(IndexError::InvalidEntry("store offline".into()))
    }

    async fn put_snapshot(&self, _block: u64, _owners: &OwnerBalances) -> Result<(), IndexError> {
        Err(IndexError::InvalidEntry("store offline".into()))
    }
}

pub enum Round {
    /// Resolve these owners (if requested) with the given balance.
    Resolve(Vec<Address>, &'static str),
    Fail,
}

/// Fetcher that plays back one scripted round per call; unscripted calls resolve nothing.
#[derive(Default)]
pub struct ScriptedFetcher {
    rounds: Mutex<VecDeque<Round>>,
    pub calls: Mutex<Vec<Vec<Address>>>,
}

impl ScriptedFetcher {
    pub fn new(rounds: Vec<Round>) -> Arc<Self> {
        Arc::new(Self { rounds: Mutex::new(rounds.into()), calls: Mutex::new(Vec::new()) })
    }

    pub fn calls(&self) -> Vec<Vec<Address>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BalanceFetcher for ScriptedFetcher {
    async fn fetch_balances(&self, owners: &[Address], _block: u64) -> Result<OwnerBalances, BalanceError> {
        self.calls.lock().unwrap().push(owners.to_vec());
        let round = self.rounds.lock().unwrap().pop_front();
        match round {
            Some(Round::Resolve(resolves, balance)) => Ok(owners
                .iter()
                .filter(|owner| resolves.contains(owner))
                .map(|&owner| (owner, balance.to_string()))
                .collect()),
            Some(Round::Fail) => Err(BalanceError::Fetch("upstream unavailable".into())),
            None => Ok(OwnerBalances::new()),
        }
    }
}
