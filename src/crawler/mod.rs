pub mod commit;
pub mod extract;
pub mod fetch;
pub mod range;

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{error, info};

use crate::chain::ChainClient;
use crate::config::CrawlerSettings;
use crate::error::{CrawlError, CrawlPhase, CycleError};
use crate::index_store::IndexStore;
use crate::ledger::Ledger;
use range::BlockRange;

/// What one successful cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub range: BlockRange,
    pub events: usize,
    pub transfers: usize,
}

fn in_phase<T, E: Into<CrawlError>>(phase: CrawlPhase, result: Result<T, E>) -> Result<T, CycleError> {
    result.map_err(|e| CycleError { phase, source: e.into() })
}

/// Single sequential worker: plan, fetch, extract, commit, forever.
pub struct Crawler {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    index: Arc<dyn IndexStore>,
    settings: CrawlerSettings,
}

impl Crawler {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        index: Arc<dyn IndexStore>,
        settings: CrawlerSettings,
    ) -> Self {
        Self { chain, ledger, index, settings }
    }

    pub fn settings(&self) -> &CrawlerSettings {
        &self.settings
    }

    /// Never returns; the process is expected to be stopped from outside.
    pub async fn run(&self) {
        info!("[Crawler] Starting blockchain event crawler for {}", self.settings.contract);
        loop {
            self.run_cycle().await;
        }
    }

    /// Idle delay, one crawl, and the error delay if the crawl failed.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        sleep(self.settings.idle_delay).await;
        match self.crawl_once().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("[Crawler] Crawler cycle failed: {}", e);
                info!("[Crawler] Retrying after {:?} delay...", self.settings.error_delay);
                sleep(self.settings.error_delay).await;
                None
            }
        }
    }

    pub async fn crawl_once(&self) -> Result<CycleReport, CycleError> {
        let chain = self.chain.as_ref();
        let contract = self.settings.contract;

        let planned = in_phase(
            CrawlPhase::Planning,
            range::plan_range(chain, &self.ledger, &self.settings).await,
        )?;
        info!(
            "[Crawler] Crawling blocks {} to {} ({} blocks)",
            planned.from_block, planned.to_block, planned.block_count()
        );

        let fetched = in_phase(
            CrawlPhase::Fetching,
            fetch::fetch_contract_events(chain, contract, planned, self.settings.min_block_range).await,
        )?;
        let range = fetched.range;
        info!("[Crawler] Found {} events to process", fetched.logs.len());

        if fetched.logs.is_empty() {
            in_phase(CrawlPhase::Committing, commit::advance_cursor(&self.ledger, contract, range).await)?;
            return Ok(CycleReport { range, events: 0, transfers: 0 });
        }

        let extracted = in_phase(
            CrawlPhase::Extracting,
            extract::extract_transfers(chain, &fetched.logs).await,
        )?;

        let saved = in_phase(
            CrawlPhase::Committing,
            commit::commit_transfers(&self.ledger, self.index.as_ref(), contract, range, &extracted).await,
        )?;

        info!(
            "[Crawler] Successfully processed {} events from blocks {}-{}",
            fetched.logs.len(), range.from_block, range.to_block
        );
        Ok(CycleReport { range, events: fetched.logs.len(), transfers: saved })
    }
}
