use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::info;

use crate::balances::OwnerBalances;
use crate::error::IndexError;
use crate::ledger::Ledger;

const BLOCK_TIMESTAMP_KEY: &str = "block_timestamp";

fn snapshot_key(block: u64) -> String {
    format!("balance:{}", block)
}

/// Block number and its timestamp (seconds), as published by the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTime {
    pub block: u64,
    pub timestamp: u64,
}

/// Side store for the block-time index and finalized snapshots. Not transactional.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn publish_block_timestamps(&self, entries: &[BlockTime]) -> Result<(), IndexError>;

    /// Largest indexed block whose timestamp is `<= timestamp`.
    async fn find_block_at_or_before(&self, timestamp: u64) -> Result<Option<u64>, IndexError>;

    async fn get_snapshot(&self, block: u64) -> Result<Option<OwnerBalances>, IndexError>;

    async fn put_snapshot(&self, block: u64, owners: &OwnerBalances) -> Result<(), IndexError>;
}

/// Sorted set `block_timestamp` (score = timestamp, member = block) and
/// `balance:<block>` JSON strings.
pub struct RedisIndex {
    conn: ConnectionManager,
}

impl RedisIndex {
    pub async fn connect(redis_url: &str) -> Result<Self, IndexError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl IndexStore for RedisIndex {
    async fn publish_block_timestamps(&self, entries: &[BlockTime]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for entry in entries {
            pipe.zadd(BLOCK_TIMESTAMP_KEY, entry.block, entry.timestamp).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn find_block_at_or_before(&self, timestamp: u64) -> Result<Option<u64>, IndexError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .zrevrangebyscore_limit(BLOCK_TIMESTAMP_KEY, timestamp, 0, 0, 1)
            .await?;
        match members.first() {
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|e| IndexError::InvalidEntry(format!("block member {raw}: {e}"))),
            None => Ok(None),
        }
    }

    async fn get_snapshot(&self, block: u64) -> Result<Option<OwnerBalances>, IndexError> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(snapshot_key(block)).await?;
        match cached {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_snapshot(&self, block: u64, owners: &OwnerBalances) -> Result<(), IndexError> {
        let json = serde_json::to_string(owners)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(snapshot_key(block), json).await?;
        Ok(())
    }
}

/// Index tables inside the ledger file, used when no Redis URL is configured. Every
/// process opening the same database sees the same index.
pub struct LedgerIndex {
    ledger: Arc<Ledger>,
}

impl LedgerIndex {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl IndexStore for LedgerIndex {
    async fn publish_block_timestamps(&self, entries: &[BlockTime]) -> Result<(), IndexError> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries = entries.to_vec();
        self.ledger.run_blocking(move |l| l.publish_block_times(&entries)).await?;
        Ok(())
    }

    async fn find_block_at_or_before(&self, timestamp: u64) -> Result<Option<u64>, IndexError> {
        Ok(self.ledger.run_blocking(move |l| l.block_at_or_before(timestamp)).await?)
    }

    async fn get_snapshot(&self, block: u64) -> Result<Option<OwnerBalances>, IndexError> {
        match self.ledger.run_blocking(move |l| l.snapshot(block)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_snapshot(&self, block: u64, owners: &OwnerBalances) -> Result<(), IndexError> {
        let json = serde_json::to_string(owners)?;
        self.ledger.run_blocking(move |l| l.put_snapshot(block, &json)).await?;
        Ok(())
    }
}

/// Redis when a URL is configured, otherwise the ledger's own tables. An unreachable
/// Redis is an error.
pub async fn open_index(redis_url: Option<&str>, ledger: Arc<Ledger>) -> Result<Arc<dyn IndexStore>, IndexError> {
    match redis_url {
        Some(url) => {
            let index = RedisIndex::connect(url).await?;
            info!("[Startup] Using Redis index at {}", url);
            Ok(Arc::new(index))
        }
        None => {
            info!("[Startup] REDIS_URL not set; using ledger index tables");
            Ok(Arc::new(LedgerIndex::new(ledger)))
        }
    }
}
