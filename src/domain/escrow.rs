use super::money::Amount;
use super::prize::{PrizeRecord, PrizeStatus};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    Distributed,
}

/// One completed transfer out of an escrow pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub payee_id: String,
    pub amount: Amount,
    pub transfer_id: String,
    pub distributed_at: DateTime<Utc>,
}

/// Funds held on behalf of one prize pool.
///
/// `distributed_amount` only grows, only through [`EscrowRecord::record_distribution`],
/// and never exceeds `total_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRecord {
    pub id: String,
    pub pool_id: String,
    pub total_amount: Amount,
    #[serde(default)]
    pub distributed_amount: Amount,
    pub status: EscrowStatus,
    #[serde(default)]
    pub distributed_to: Vec<Distribution>,
}

impl EscrowRecord {
    pub fn new(id: impl Into<String>, pool_id: impl Into<String>, total_amount: Amount) -> Self {
        Self {
            id: id.into(),
            pool_id: pool_id.into(),
            total_amount,
            distributed_amount: Amount::ZERO,
            status: EscrowStatus::Held,
            distributed_to: Vec::new(),
        }
    }

    pub fn remaining(&self) -> Amount {
        self.total_amount.saturating_sub(self.distributed_amount)
    }

    /// Checks that `claimant` still fits once every other `processing` claim
    /// against this escrow is honoured. Those claims may have transfers in
    /// flight, so their amounts count as spent.
    pub fn reserve_for<'a>(
        &self,
        claimant: &PrizeRecord,
        prizes: impl IntoIterator<Item = &'a PrizeRecord>,
    ) -> Result<(), LedgerError> {
        let in_flight: Amount = prizes
            .into_iter()
            .filter(|p| {
                p.id != claimant.id
                    && p.status == PrizeStatus::Processing
                    && p.escrow_record_id.as_deref() == Some(self.id.as_str())
            })
            .map(|p| p.owed_amount)
            .sum();
        let uncommitted = self.remaining().saturating_sub(in_flight);
        if claimant.owed_amount > uncommitted {
            return Err(LedgerError::Overdrawn {
                escrow_id: self.id.clone(),
                amount: claimant.owed_amount,
                remaining: uncommitted,
            });
        }
        Ok(())
    }

    /// Appends a ledger entry and increments the distributed total.
    ///
    /// Flips the escrow to `distributed` when it is fully drawn down or when
    /// `obligations_remain` is false.
    pub fn record_distribution(
        &mut self,
        distribution: Distribution,
        obligations_remain: bool,
    ) -> Result<(), LedgerError> {
        let overdrawn = || LedgerError::Overdrawn {
            escrow_id: self.id.clone(),
            amount: distribution.amount,
            remaining: self.remaining(),
        };
        let next = self
            .distributed_amount
            .checked_add(distribution.amount)
            .ok_or_else(overdrawn)?;
        if next > self.total_amount {
            return Err(overdrawn());
        }

        self.distributed_amount = next;
        self.distributed_to.push(distribution);
        if next == self.total_amount || !obligations_remain {
            self.status = EscrowStatus::Distributed;
        }
        Ok(())
    }

    /// `distributed_amount` equals the sum of the ledger entries and stays
    /// within `total_amount`.
    pub fn is_conserved(&self) -> bool {
        let ledger: Amount = self.distributed_to.iter().map(|d| d.amount).sum();
        ledger == self.distributed_amount && self.distributed_amount <= self.total_amount
    }
}
