use alloy::primitives::Address;
use std::str::FromStr;
use tokio::time::Duration;

use crate::error::ConfigError;

/// Crawl-engine tuning. Everything the crawler needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct CrawlerSettings {
    pub contract: Address,
    pub start_block: u64,
    /// Blocks behind head treated as safe from reorganisation.
    pub confirmation_depth: u64,
    /// Maximum `to - from` per cycle.
    pub window_size: u64,
    /// Adaptive shrink floor.
    pub min_block_range: u64,
    pub idle_delay: Duration,
    pub error_delay: Duration,
}

impl CrawlerSettings {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            start_block: 0,
            confirmation_depth: 12,
            window_size: 1000,
            min_block_range: 10,
            idle_delay: Duration::from_millis(3000),
            error_delay: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub database_path: String,
    pub redis_url: Option<String>,
    pub crawler: CrawlerSettings,
    /// A snapshot is cached only when the cursor is more than this many blocks past it.
    pub save_block_margin: u64,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn parsed_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            reason: format!("{raw:?}: {e}"),
        }),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let rpc_url = required("RPC_URL")?;
        let contract_raw = required("NFT_CONTRACT")?;
        let contract = Address::from_str(contract_raw.trim()).map_err(|e| ConfigError::Invalid {
            key: "NFT_CONTRACT",
            reason: format!("{contract_raw:?}: {e}"),
        })?;

        let defaults = CrawlerSettings::new(contract);
        let min_block_range = parsed_or("MIN_BLOCK_RANGE", defaults.min_block_range)?;
        if min_block_range == 0 {
            return Err(ConfigError::Invalid {
                key: "MIN_BLOCK_RANGE",
                reason: "must be at least 1".into(),
            });
        }
        let crawler = CrawlerSettings {
            contract,
            start_block: parsed_or("START_BLOCK", defaults.start_block)?,
            confirmation_depth: parsed_or("BLOCK_DELAY", defaults.confirmation_depth)?,
            window_size: parsed_or("BLOCK_CRAWL", defaults.window_size)?,
            min_block_range,
            idle_delay: Duration::from_millis(parsed_or("BLOCK_SLEEP_MS", 3000u64)?),
            error_delay: Duration::from_millis(parsed_or("CRAWLER_ERROR_DELAY_MS", 5000u64)?),
        };

        Ok(Self {
            rpc_url,
            database_path: parsed_or("DATABASE_PATH", "data/ledger.db".to_string())?,
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            crawler,
            save_block_margin: parsed_or("SAVE_BLOCK_NUMBER", 20u64)?,
        })
    }
}
