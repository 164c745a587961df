use alloy::primitives::Address;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::backoff::Backoff;
use crate::balances::fetch::BalanceFetcher;
use crate::balances::{BalanceSnapshot, OwnerBalances};
use crate::error::BalanceError;

pub const UNRESOLVED_BALANCE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryParams {
    pub max_rounds: u32,
    /// Wait between rounds that completed but left owners unresolved.
    pub success_backoff: Backoff,
    /// Wait after a round that failed outright.
    pub error_backoff: Backoff,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            success_backoff: Backoff::new(Duration::from_secs(2), Duration::from_secs(30)),
            error_backoff: Backoff::new(Duration::from_secs(3), Duration::from_secs(60)),
        }
    }
}

/// Requested owners without an entry in `resolved`, in request order.
pub fn missing_owners(requested: &[Address], resolved: &OwnerBalances) -> Vec<Address> {
    requested.iter().filter(|owner| !resolved.contains_key(*owner)).copied().collect()
}

/// Re-fetches owners the pipeline could not resolve, one round at a time, until every
/// requested owner has a balance or the rounds run out. Leftovers are reported as zero
/// inside an `IncompleteSnapshot` error so the caller can still serve them.
pub async fn recover_missing(
    fetcher: &dyn BalanceFetcher,
    requested: &[Address],
    mut resolved: OwnerBalances,
    block: u64,
    params: &RetryParams,
) -> Result<OwnerBalances, BalanceError> {
    let mut missing = missing_owners(requested, &resolved);
    if missing.is_empty() {
        return Ok(resolved);
    }

    for round in 1..=params.max_rounds {
        info!("[Balances] Retry round {}/{} for {} wallets", round, params.max_rounds, missing.len());
        let wait = match fetcher.fetch_balances(&missing, block).await {
            Ok(recovered) => {
                info!("[Balances] Recovered {} balances in round {}", recovered.len(), round);
                resolved.extend(recovered);
                missing = missing_owners(requested, &resolved);
                if missing.is_empty() {
                    return Ok(resolved);
                }
                params.success_backoff.delay(round)
            }
            Err(e) => {
                warn!("[Balances] Retry round {} failed: {}", round, e);
                params.error_backoff.delay(round)
            }
        };
        if round < params.max_rounds {
            sleep(wait).await;
        }
    }

    error!(
        "[Balances] {} wallets still unresolved after {} rounds, reporting them as {}",
        missing.len(),
        params.max_rounds,
        UNRESOLVED_BALANCE
    );
    let failed = missing.len();
    for owner in missing {
        resolved.insert(owner, UNRESOLVED_BALANCE.to_string());
    }
    Err(BalanceError::IncompleteSnapshot {
        failed,
        attempts: params.max_rounds,
        snapshot: BalanceSnapshot { block_number: block, owners: resolved },
    })
}
