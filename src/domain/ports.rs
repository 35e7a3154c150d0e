use super::audit::AuditEntry;
use super::commit::{CommitOutcome, PayoutCommit};
use super::escrow::EscrowRecord;
use super::pool::{DistributionStatus, PrizePool};
use super::prize::{PrizeRecord, PrizeStatus};
use super::provider::{ProviderBalance, Transfer, TransferRequest};
use super::winner::WinnerProfile;
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Document store holding the payout ledger.
///
/// Every write to a [`PrizeRecord`] through [`LedgerStore::update_prize`] is a
/// compare-and-set on `version`; the store bumps the version on success.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn prize(&self, id: &str) -> Result<Option<PrizeRecord>>;
    async fn prizes(&self) -> Result<Vec<PrizeRecord>>;
    async fn prizes_with_status(&self, pool_id: &str, status: PrizeStatus)
    -> Result<Vec<PrizeRecord>>;
    /// Unconditional write, used when seeding the ledger.
    async fn put_prize(&self, prize: PrizeRecord) -> Result<()>;
    /// Writes `prize` if the stored version still equals `prize.version`.
    async fn update_prize(&self, prize: PrizeRecord) -> Result<PrizeRecord>;
    /// Compare-and-set write of a freshly claimed record that also reserves its
    /// owed amount against the linked escrow, checked against the other
    /// `processing` claims in the same critical section.
    async fn claim_prize(&self, prize: PrizeRecord) -> Result<PrizeRecord>;

    async fn escrow(&self, id: &str) -> Result<Option<EscrowRecord>>;
    async fn held_escrow(&self, pool_id: &str) -> Result<Option<EscrowRecord>>;
    async fn put_escrow(&self, escrow: EscrowRecord) -> Result<()>;

    async fn winner(&self, payee_id: &str) -> Result<Option<WinnerProfile>>;
    async fn put_winner(&self, winner: WinnerProfile) -> Result<()>;

    async fn pools_awaiting_distribution(&self) -> Result<Vec<PrizePool>>;
    async fn put_pool(&self, pool: PrizePool) -> Result<()>;
    async fn set_pool_status(&self, pool_id: &str, status: DistributionStatus) -> Result<()>;

    /// Applies the prize, escrow and winner-profile updates atomically.
    async fn commit_payout(&self, commit: &PayoutCommit) -> Result<CommitOutcome>;
}

/// External payments API holding the platform's settlement balance.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn available_balance(
        &self,
        currency: &str,
    ) -> std::result::Result<ProviderBalance, ProviderError>;
    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> std::result::Result<Transfer, ProviderError>;
    async fn transfer(&self, transfer_id: &str) -> std::result::Result<Transfer, ProviderError>;
}

/// Destination for audit entries. Failures here never affect payouts.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type PaymentProviderRef = Arc<dyn PaymentProvider>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
