use super::escrow::{Distribution, EscrowRecord};
use super::money::Amount;
use super::prize::{PrizeRecord, PrizeStatus};
use super::winner::{WinnerEntry, WinnerProfile};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};

/// The multi-entity write that records a completed transfer.
///
/// Stores apply it with [`PayoutCommit::apply`] against their current copies of
/// the three documents and persist all of them or none.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutCommit {
    pub prize_id: String,
    /// The prize version observed when the lease was taken.
    pub expected_version: u64,
    pub escrow_id: String,
    pub transfer_id: String,
    pub amount: Amount,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// The prize was already paid with this transfer; nothing was written.
    AlreadyCommitted,
}

impl PayoutCommit {
    /// Mutates the in-memory copies; callers persist them only on `Applied`.
    ///
    /// `obligations_remain` tells whether any other prize in the pool is still unpaid.
    pub fn apply(
        &self,
        prize: &mut PrizeRecord,
        escrow: &mut EscrowRecord,
        winner: &mut WinnerProfile,
        obligations_remain: bool,
    ) -> Result<CommitOutcome, LedgerError> {
        if prize.status == PrizeStatus::Paid
            && prize.transfer_id.as_deref() == Some(self.transfer_id.as_str())
        {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        if prize.version != self.expected_version || prize.status != PrizeStatus::Processing {
            return Err(LedgerError::Conflict {
                entity: "prize",
                id: prize.id.clone(),
            });
        }
        if escrow.pool_id != prize.pool_id {
            return Err(LedgerError::Backend(format!(
                "escrow {} does not fund pool {}",
                escrow.id, prize.pool_id
            )));
        }

        escrow.record_distribution(
            Distribution {
                payee_id: prize.payee_id.clone(),
                amount: self.amount,
                transfer_id: self.transfer_id.clone(),
                distributed_at: self.paid_at,
            },
            obligations_remain,
        )?;
        prize.mark_paid(&self.transfer_id, self.paid_at)?;
        winner.upsert(WinnerEntry {
            pool_id: prize.pool_id.clone(),
            placement: prize.placement,
            status: PrizeStatus::Paid,
            transfer_id: Some(self.transfer_id.clone()),
            amount: self.amount,
        });
        Ok(CommitOutcome::Applied)
    }
}
