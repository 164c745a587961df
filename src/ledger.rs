use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::LedgerError;
use crate::index_store::BlockTime;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transfers (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    from_address    TEXT    NOT NULL,
    to_address      TEXT    NOT NULL,
    token_id        TEXT    NOT NULL,
    tx_hash         TEXT    NOT NULL,
    log_index       INTEGER NOT NULL,
    block_number    INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transfers_token_block ON transfers (token_id, block_number);
CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number);
CREATE UNIQUE INDEX IF NOT EXISTS idx_transfers_tx_log ON transfers (tx_hash, log_index);

CREATE TABLE IF NOT EXISTS cursors (
    contract_address TEXT    PRIMARY KEY,
    block            INTEGER NOT NULL,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS block_times (
    block     INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_block_times_timestamp ON block_times (timestamp);

CREATE TABLE IF NOT EXISTS snapshots (
    block      INTEGER PRIMARY KEY,
    owners     TEXT    NOT NULL,
    created_at INTEGER NOT NULL
);
";

/// Latest transfer per token at or before the snapshot block, projected to its recipient.
const DISTINCT_OWNERS_SQL: &str = "
SELECT DISTINCT latest.to_address
FROM (
    SELECT
        t.to_address,
        ROW_NUMBER() OVER (
            PARTITION BY t.token_id
            ORDER BY t.block_number DESC, t.log_index DESC, t.id DESC
        ) AS row_num
    FROM transfers t
    WHERE t.block_number <= ?1
) latest
WHERE latest.row_num = 1
ORDER BY latest.to_address
";

/// One ownership transfer. Append-only: created by the crawler, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
}

fn address_key(address: Address) -> String {
    format!("{:#x}", address)
}

fn upsert_cursor(conn: &Connection, contract: Address, block: u64) -> Result<(), LedgerError> {
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT INTO cursors (contract_address, block, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT (contract_address) DO UPDATE SET
             block = MAX(cursors.block, excluded.block),
             updated_at = excluded.updated_at",
        params![address_key(contract), block as i64, now],
    )?;
    Ok(())
}

/// Relational ledger of transfers plus the per-contract crawl cursor.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `work` on the blocking pool. Every ledger access from async code goes through
    /// here so a long query never holds a runtime worker.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&ledger))
            .await
            .map_err(|e| LedgerError::Task(e.to_string()))?
    }

    pub fn find_cursor(&self, contract: Address) -> Result<Option<u64>, LedgerError> {
        let block: Option<i64> = self.conn()
            .query_row(
                "SELECT block FROM cursors WHERE contract_address = ?1",
                params![address_key(contract)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block.map(|b| b as u64))
    }

    /// Creates the cursor or advances it outside any transaction. Never moves it backwards.
    pub fn save_cursor(&self, contract: Address, block: u64) -> Result<(), LedgerError> {
        upsert_cursor(&self.conn(), contract, block)
    }

    /// Runs `work` inside one transaction. Any error rolls everything back.
    pub fn unit_of_work<T>(
        &self,
        work: impl FnOnce(&Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let out = work(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn update_cursor_in_transaction(
        tx: &Transaction<'_>,
        contract: Address,
        block: u64,
    ) -> Result<(), LedgerError> {
        upsert_cursor(tx, contract, block)
    }

    pub fn bulk_insert_transfers(
        tx: &Transaction<'_>,
        records: &[TransferRecord],
    ) -> Result<usize, LedgerError> {
        let now = Utc::now().timestamp();
        let mut stmt = tx.prepare_cached(
            "INSERT INTO transfers
                (from_address, to_address, token_id, tx_hash, log_index, block_number, block_timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for rec in records {
            stmt.execute(params![
                address_key(rec.from),
                address_key(rec.to),
                rec.token_id.to_string(),
                format!("{:#x}", rec.tx_hash),
                rec.log_index as i64,
                rec.block_number as i64,
                rec.block_timestamp as i64,
                now,
            ])?;
        }
        Ok(records.len())
    }

    /// Distinct current owners as of `snapshot_block`, streamed from one window query.
    pub fn distinct_owners(&self, snapshot_block: u64) -> Result<Vec<Address>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(DISTINCT_OWNERS_SQL)?;
        let rows = stmt.query_map(params![snapshot_block as i64], |row| row.get::<_, String>(0))?;

        let mut owners = Vec::new();
        for row in rows {
            let raw = row?;
            let owner = Address::from_str(&raw).map_err(|e| LedgerError::InvalidRow {
                table: "transfers",
                reason: format!("to_address {raw}: {e}"),
            })?;
            owners.push(owner);
        }
        Ok(owners)
    }

    pub fn transfer_count(&self) -> Result<u64, LedgerError> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Upserts block timestamps; a re-crawled block keeps its latest timestamp.
    pub fn publish_block_times(&self, entries: &[BlockTime]) -> Result<(), LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO block_times (block, timestamp) VALUES (?1, ?2)
                 ON CONFLICT (block) DO UPDATE SET timestamp = excluded.timestamp",
            )?;
            for entry in entries {
                stmt.execute(params![entry.block as i64, entry.timestamp as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn block_at_or_before(&self, timestamp: u64) -> Result<Option<u64>, LedgerError> {
        let block: Option<i64> = self.conn()
            .query_row(
                "SELECT block FROM block_times
                 WHERE timestamp <= ?1
                 ORDER BY timestamp DESC, block DESC
                 LIMIT 1",
                params![timestamp as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block.map(|b| b as u64))
    }

    pub fn block_time_count(&self) -> Result<u64, LedgerError> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM block_times", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Encoded owner map cached for `block`, if any.
    pub fn snapshot(&self, block: u64) -> Result<Option<String>, LedgerError> {
        Ok(self.conn()
            .query_row(
                "SELECT owners FROM snapshots WHERE block = ?1",
                params![block as i64],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn put_snapshot(&self, block: u64, owners: &str) -> Result<(), LedgerError> {
        self.conn().execute(
            "INSERT INTO snapshots (block, owners, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (block) DO UPDATE SET owners = excluded.owners",
            params![block as i64, owners, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn snapshot_count(&self) -> Result<u64, LedgerError> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
