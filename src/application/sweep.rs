use super::processor::PayoutProcessor;
use crate::domain::audit::{AuditEvent, PoolSweepOutcome};
use crate::domain::money::Amount;
use crate::domain::pool::{DistributionStatus, PrizePool};
use crate::domain::prize::{PrizeRecord, PrizeStatus};
use crate::error::{LedgerError, ProviderError, SweepError};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

/// Aggregate result of one sweep invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub balance_available: Amount,
    pub prize_pools_processed: usize,
    pub total_successes: usize,
    pub total_failures: usize,
    pub pools: Vec<PoolSweepOutcome>,
}

impl SweepSummary {
    fn new(balance_available: Amount) -> Self {
        Self {
            balance_available,
            prize_pools_processed: 0,
            total_successes: 0,
            total_failures: 0,
            pools: Vec::new(),
        }
    }

    fn push(&mut self, outcome: PoolSweepOutcome) {
        if outcome.skipped.is_none() {
            self.prize_pools_processed += 1;
        }
        self.total_successes += outcome.successes;
        self.total_failures += outcome.failures;
        self.pools.push(outcome);
    }
}

/// Periodic retry of recoverable payouts.
///
/// Admission is all-or-nothing per pool: a pool's recoverable records are only
/// attempted when the balance covers all of them. Attempts then run one record
/// at a time through the [`PayoutProcessor`], which stays the only writer.
#[derive(Clone)]
pub struct RetrySweep {
    processor: PayoutProcessor,
}

impl RetrySweep {
    pub fn new(processor: PayoutProcessor) -> Self {
        Self { processor }
    }

    pub async fn run(&self) -> Result<SweepSummary, SweepError> {
        let currency = self.processor.settings().currency.as_str();
        let limit = self.processor.settings().provider_timeout;
        let balance = tokio::time::timeout(limit, self.processor.provider().available_balance(currency))
            .await
            .map_err(|_| ProviderError::Timeout(limit))??;

        let mut summary = SweepSummary::new(balance.available);
        if balance.available.is_zero() {
            info!("no available balance; sweep skipped");
            return Ok(summary);
        }

        let pools = self.processor.ledger().pools_awaiting_distribution().await?;
        // Admission for later pools accounts for what earlier pools just spent.
        let mut budget = balance.available;
        for pool in pools {
            match self.sweep_pool(&pool, budget).await {
                Ok(Some((outcome, spent))) => {
                    budget = budget.saturating_sub(spent);
                    summary.push(outcome);
                }
                Ok(None) => {}
                Err(e) => warn!(pool_id = %pool.id, error = %e, "pool skipped: ledger read failed"),
            }
        }

        info!(
            pools = summary.prize_pools_processed,
            successes = summary.total_successes,
            failures = summary.total_failures,
            "sweep complete"
        );
        self.processor.audit().record(AuditEvent::SweepCompleted {
            balance_available: summary.balance_available,
            pools: summary.pools.clone(),
        });
        Ok(summary)
    }

    /// Recoverable records: waiting on funds, or stuck mid-attempt past the
    /// staleness window.
    async fn candidates(&self, pool_id: &str) -> Result<Vec<PrizeRecord>, LedgerError> {
        let ledger = self.processor.ledger();
        let now = Utc::now();
        let stale_after = self.processor.settings().stale_after;

        let mut candidates = ledger
            .prizes_with_status(pool_id, PrizeStatus::PendingFunds)
            .await?;
        candidates.extend(
            ledger
                .prizes_with_status(pool_id, PrizeStatus::Processing)
                .await?
                .into_iter()
                .filter(|p| p.is_stale(now, stale_after)),
        );
        Ok(candidates)
    }

    async fn sweep_pool(
        &self,
        pool: &PrizePool,
        budget: Amount,
    ) -> Result<Option<(PoolSweepOutcome, Amount)>, LedgerError> {
        let candidates = self.candidates(&pool.id).await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let group_total: Amount = candidates.iter().map(|p| p.owed_amount).sum();
        let mut outcome = PoolSweepOutcome {
            pool_id: pool.id.clone(),
            group_total,
            attempted: 0,
            successes: 0,
            failures: 0,
            skipped: None,
        };
        if budget < group_total {
            info!(
                pool_id = %pool.id,
                group_total = %group_total,
                budget = %budget,
                "balance cannot cover the whole group; pool deferred"
            );
            outcome.skipped = Some("insufficient balance for group".to_string());
            return Ok(Some((outcome, Amount::ZERO)));
        }

        let mut spent = Amount::ZERO;
        for prize in &candidates {
            outcome.attempted += 1;
            match self.processor.process_payout(&prize.id).await {
                Ok(receipt) => {
                    outcome.successes += 1;
                    if !receipt.already_paid {
                        spent += receipt.amount;
                    }
                }
                Err(e) => {
                    outcome.failures += 1;
                    warn!(prize_id = %prize.id, error = %e, "sweep attempt failed");
                }
            }
        }

        let status = if outcome.failures == 0 {
            DistributionStatus::Distributed
        } else {
            DistributionStatus::Failed
        };
        if let Err(e) = self.processor.ledger().set_pool_status(&pool.id, status).await {
            warn!(pool_id = %pool.id, error = %e, "could not update pool status");
        }
        Ok(Some((outcome, spent)))
    }
}
