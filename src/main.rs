use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};

use nft_holders::{
    balances::{validate::parse_timestamp, BalanceService},
    chain::{ChainClient, RpcChain},
    config::Config,
    crawler::Crawler,
    error::BalanceError,
    index_store::open_index,
    ledger::Ledger,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl Transfer events into the ledger
    Crawl {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Owner balances at a wall-clock time, as JSON on stdout
    Balances {
        /// Milliseconds since the epoch
        #[arg(short, long)]
        timestamp: String,

        /// Skip the snapshot cache
        #[arg(long)]
        force_refresh: bool,
    },
}

async fn crawl(crawler: Crawler, once: bool) {
    if once {
        match crawler.run_cycle().await {
            Some(report) => info!(
                "[Crawler] Cycle done: blocks {}-{}, {} events, {} transfers",
                report.range.from_block, report.range.to_block, report.events, report.transfers
            ),
            None => warn!("[Crawler] Cycle did not complete"),
        }
        return;
    }

    tokio::select! {
        _ = crawler.run() => {
            error!("[Crawler] Crawl loop exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("[Crawler] Shutting down...");
        }
    }
}

async fn balances(service: BalanceService, raw_timestamp: &str, force_refresh: bool) -> bool {
    let result = match parse_timestamp(raw_timestamp) {
        Ok(timestamp) => service.resolve(timestamp, force_refresh).await,
        Err(e) => Err(BalanceError::from(e)),
    };
    match result {
        Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
            Ok(body) => {
                println!("{body}");
                true
            }
            Err(e) => {
                error!("[Balances] Failed to encode snapshot: {}", e);
                false
            }
        },
        Err(e) => {
            error!("[Balances] {}", e);
            println!("{:#}", e.report());
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let chain: Arc<dyn ChainClient> = Arc::new(RpcChain::connect_http(&config.rpc_url)?);
    let ledger = Arc::new(Ledger::open(&config.database_path)?);
    let index = open_index(config.redis_url.as_deref(), ledger.clone()).await?;

    match cli.command {
        Commands::Crawl { once } => {
            let crawler = Crawler::new(chain, ledger, index, config.crawler.clone());
            crawl(crawler, once).await;
        }
        Commands::Balances { timestamp, force_refresh } => {
            let service = BalanceService::new(
                chain,
                ledger,
                index,
                config.crawler.contract,
                config.save_block_margin,
            );
            if !balances(service, &timestamp, force_refresh).await {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
