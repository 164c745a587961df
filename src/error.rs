use std::fmt;

use thiserror::Error;

use crate::balances::BalanceSnapshot;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Provider refused the query because the result set exceeds its fixed cap.
    #[error("result set too large: {0}")]
    TooManyResults(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("malformed log: {0}")]
    MalformedLog(&'static str),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },
    #[error("blocking ledger task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("invalid index entry: {0}")]
    InvalidEntry(String),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("block range {width} is below minimum threshold {min}")]
    RangeBelowFloor { width: u64, min: u64 },
    #[error("all {attempts} fetch attempts failed: {source}")]
    RetriesExhausted { attempts: u32, source: ChainError },
}

/// Working state of a crawl cycle, used to tag cycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    Planning,
    Fetching,
    Extracting,
    Committing,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlPhase::Idle => "idle",
            CrawlPhase::Planning => "planning",
            CrawlPhase::Fetching => "fetching",
            CrawlPhase::Extracting => "extracting",
            CrawlPhase::Committing => "committing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("crawl cycle failed while {phase}: {source}")]
pub struct CycleError {
    pub phase: CrawlPhase,
    #[source]
    pub source: CrawlError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Timestamp must be a positive integer (provided: {provided})")]
    InvalidFormat { provided: String },
    #[error("Timestamp cannot be in the future (provided: {provided}, current: {current})")]
    FutureTimestamp { provided: i64, current: i64 },
    #[error("Timestamp is too far in the past (provided: {provided}, minimum: {minimum})")]
    TooOld { provided: i64, minimum: i64 },
}

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No block found for timestamp {timestamp}")]
    BlockNotFound { timestamp: i64 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("balance fetch failed: {0}")]
    Fetch(String),
    #[error("Failed to get balance for {failed} wallets after {attempts} retry attempts")]
    IncompleteSnapshot {
        failed: usize,
        attempts: u32,
        snapshot: BalanceSnapshot,
    },
}

impl BalanceError {
    pub fn status_code(&self) -> u16 {
        match self {
            BalanceError::Validation(_) | BalanceError::IncompleteSnapshot { .. } => 400,
            BalanceError::BlockNotFound { .. } => 404,
            _ => 500,
        }
    }

    /// Error body for clients: enough structure to decide whether to retry with
    /// `forceRefresh`, or to use the attached best-effort owners.
    pub fn report(&self) -> serde_json::Value {
        use serde_json::json;

        let status = self.status_code();
        let info = match self {
            BalanceError::Validation(ValidationError::InvalidFormat { provided }) => json!({
                "message": self.to_string(),
                "error": "Invalid Timestamp Format",
                "details": { "provided": provided, "expectedType": "positive integer" },
            }),
            BalanceError::Validation(ValidationError::FutureTimestamp { provided, current }) => json!({
                "message": self.to_string(),
                "error": "Future Timestamp",
                "details": { "provided": provided, "current": current },
            }),
            BalanceError::Validation(ValidationError::TooOld { provided, minimum }) => json!({
                "message": self.to_string(),
                "error": "Historical Timestamp",
                "details": {
                    "provided": provided,
                    "minimum": minimum,
                    "reason": "NFT data not available before the minimum timestamp",
                },
            }),
            BalanceError::IncompleteSnapshot { failed, snapshot, .. } => json!({
                "message": self.to_string(),
                "error": "Incomplete Snapshot",
                "details": { "failedWallets": failed, "fallback": snapshot },
            }),
            _ => json!({ "message": self.to_string() }),
        };
        let code = match status {
            400 => "ERROR_00400",
            404 => "ERROR_00404",
            _ => "ERROR_00000",
        };
        json!({ "code": code, "statusCode": status, "info": info })
    }
}
