use crate::domain::audit::AuditEntry;
use crate::domain::commit::{CommitOutcome, PayoutCommit};
use crate::domain::escrow::{EscrowRecord, EscrowStatus};
use crate::domain::pool::{DistributionStatus, PrizePool};
use crate::domain::ports::{AuditSink, LedgerStore};
use crate::domain::prize::{PrizeRecord, PrizeStatus};
use crate::domain::winner::WinnerProfile;
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    prizes: HashMap<String, PrizeRecord>,
    escrows: HashMap<String, EscrowRecord>,
    winners: HashMap<String, WinnerProfile>,
    pools: HashMap<String, PrizePool>,
}

/// A thread-safe in-memory payout ledger.
///
/// All entities live behind a single `RwLock`, so a payout commit observes and
/// writes the prize, escrow and winner profile as one unit.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn prize(&self, id: &str) -> Result<Option<PrizeRecord>> {
        let state = self.state.read().await;
        Ok(state.prizes.get(id).cloned())
    }

    async fn prizes(&self) -> Result<Vec<PrizeRecord>> {
        let state = self.state.read().await;
        let mut prizes: Vec<_> = state.prizes.values().cloned().collect();
        prizes.sort_by(|a, b| (&a.pool_id, a.placement).cmp(&(&b.pool_id, b.placement)));
        Ok(prizes)
    }

    async fn prizes_with_status(
        &self,
        pool_id: &str,
        status: PrizeStatus,
    ) -> Result<Vec<PrizeRecord>> {
        let state = self.state.read().await;
        let mut prizes: Vec<_> = state
            .prizes
            .values()
            .filter(|p| p.pool_id == pool_id && p.status == status)
            .cloned()
            .collect();
        prizes.sort_by_key(|p| p.placement);
        Ok(prizes)
    }

    async fn put_prize(&self, prize: PrizeRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.prizes.insert(prize.id.clone(), prize);
        Ok(())
    }

    async fn update_prize(&self, mut prize: PrizeRecord) -> Result<PrizeRecord> {
        let mut state = self.state.write().await;
        let current = state
            .prizes
            .get(&prize.id)
            .ok_or_else(|| LedgerError::NotFound {
                entity: "prize",
                id: prize.id.clone(),
            })?;
        if current.version != prize.version {
            return Err(LedgerError::Conflict {
                entity: "prize",
                id: prize.id,
            });
        }
        prize.version += 1;
        state.prizes.insert(prize.id.clone(), prize.clone());
        Ok(prize)
    }

    async fn claim_prize(&self, mut prize: PrizeRecord) -> Result<PrizeRecord> {
        let mut state = self.state.write().await;
        let current = state
            .prizes
            .get(&prize.id)
            .ok_or_else(|| LedgerError::NotFound {
                entity: "prize",
                id: prize.id.clone(),
            })?;
        if current.version != prize.version {
            return Err(LedgerError::Conflict {
                entity: "prize",
                id: prize.id,
            });
        }
        let escrow_id = prize.escrow_record_id.as_deref().unwrap_or_default();
        let escrow = state
            .escrows
            .get(escrow_id)
            .ok_or_else(|| LedgerError::NotFound {
                entity: "escrow",
                id: escrow_id.to_string(),
            })?;
        escrow.reserve_for(&prize, state.prizes.values())?;

        prize.version += 1;
        state.prizes.insert(prize.id.clone(), prize.clone());
        Ok(prize)
    }

    async fn escrow(&self, id: &str) -> Result<Option<EscrowRecord>> {
        let state = self.state.read().await;
        Ok(state.escrows.get(id).cloned())
    }

    async fn held_escrow(&self, pool_id: &str) -> Result<Option<EscrowRecord>> {
        let state = self.state.read().await;
        let mut held: Vec<_> = state
            .escrows
            .values()
            .filter(|e| e.pool_id == pool_id && e.status == EscrowStatus::Held)
            .collect();
        held.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(held.first().map(|e| (*e).clone()))
    }

    async fn put_escrow(&self, escrow: EscrowRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.escrows.insert(escrow.id.clone(), escrow);
        Ok(())
    }

    async fn winner(&self, payee_id: &str) -> Result<Option<WinnerProfile>> {
        let state = self.state.read().await;
        Ok(state.winners.get(payee_id).cloned())
    }

    async fn put_winner(&self, winner: WinnerProfile) -> Result<()> {
        let mut state = self.state.write().await;
        state.winners.insert(winner.payee_id.clone(), winner);
        Ok(())
    }

    async fn pools_awaiting_distribution(&self) -> Result<Vec<PrizePool>> {
        let state = self.state.read().await;
        let mut pools: Vec<_> = state
            .pools
            .values()
            .filter(|p| p.awaits_distribution())
            .cloned()
            .collect();
        pools.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pools)
    }

    async fn put_pool(&self, pool: PrizePool) -> Result<()> {
        let mut state = self.state.write().await;
        state.pools.insert(pool.id.clone(), pool);
        Ok(())
    }

    async fn set_pool_status(&self, pool_id: &str, status: DistributionStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let pool = state
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| LedgerError::NotFound {
                entity: "pool",
                id: pool_id.to_string(),
            })?;
        pool.distribution_status = status;
        Ok(())
    }

    async fn commit_payout(&self, commit: &PayoutCommit) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;

        let mut prize = state
            .prizes
            .get(&commit.prize_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                entity: "prize",
                id: commit.prize_id.clone(),
            })?;
        let mut escrow = state
            .escrows
            .get(&commit.escrow_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                entity: "escrow",
                id: commit.escrow_id.clone(),
            })?;
        let mut winner = state
            .winners
            .get(&prize.payee_id)
            .cloned()
            .unwrap_or_else(|| WinnerProfile::new(prize.payee_id.clone()));
        let obligations_remain = state.prizes.values().any(|p| {
            p.pool_id == prize.pool_id && p.id != prize.id && p.status != PrizeStatus::Paid
        });

        // Mutations happen on copies; nothing is written unless all succeed.
        let outcome = commit.apply(&mut prize, &mut escrow, &mut winner, obligations_remain)?;
        if outcome == CommitOutcome::Applied {
            prize.version += 1;
            state.prizes.insert(prize.id.clone(), prize);
            state.escrows.insert(escrow.id.clone(), escrow);
            state.winners.insert(winner.payee_id.clone(), winner);
        }
        Ok(outcome)
    }
}

/// Collects audit entries in memory.
#[derive(Default, Clone)]
pub struct InMemoryAuditSink {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}
