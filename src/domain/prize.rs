use super::money::Amount;
use crate::error::LedgerError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single payee's entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrizeStatus {
    PendingFunds,
    Processing,
    Paid,
    Failed,
}

impl PrizeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PrizeStatus::PendingFunds => "pending_funds",
            PrizeStatus::Processing => "processing",
            PrizeStatus::Paid => "paid",
            PrizeStatus::Failed => "failed",
        }
    }

    /// Whether a record in `self` may be moved to `next`.
    ///
    /// `Failed -> Processing` is an operator-initiated retry through the
    /// single-record trigger; the sweep never selects failed records.
    pub fn can_transition_to(self, next: PrizeStatus) -> bool {
        use PrizeStatus::*;
        match self {
            PendingFunds => matches!(next, Processing | Failed),
            Processing => matches!(next, Paid | Failed | PendingFunds),
            Failed => matches!(next, Processing | Failed),
            Paid => false,
        }
    }
}

impl fmt::Display for PrizeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record could not be claimed for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRefusal {
    AlreadyPaid,
    InProgress,
}

/// One payee's owed share of a prize pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrizeRecord {
    pub id: String,
    pub pool_id: String,
    pub payee_id: String,
    pub payee_name: String,
    pub owed_amount: Amount,
    pub placement: u32,
    pub status: PrizeStatus,
    #[serde(default)]
    pub escrow_record_id: Option<String>,
    #[serde(default)]
    pub transfer_id: Option<String>,
    /// Key of the most recent transfer attempt; a reclaim replays it.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub auto_retry_eligible: bool,
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl PrizeRecord {
    /// A freshly finalized entitlement awaiting payout.
    pub fn new(
        id: impl Into<String>,
        pool_id: impl Into<String>,
        payee_id: impl Into<String>,
        payee_name: impl Into<String>,
        owed_amount: Amount,
        placement: u32,
    ) -> Self {
        Self {
            id: id.into(),
            pool_id: pool_id.into(),
            payee_id: payee_id.into(),
            payee_name: payee_name.into(),
            owed_amount,
            placement,
            status: PrizeStatus::PendingFunds,
            escrow_record_id: None,
            transfer_id: None,
            idempotency_key: None,
            failure_reason: None,
            auto_retry_eligible: false,
            processing_started_at: None,
            paid_at: None,
            updated_at: Utc::now(),
            version: 0,
        }
    }

    /// A `processing` record whose attempt started before `now - stale_after`
    /// is treated as an unknown outcome that may be reclaimed.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.status == PrizeStatus::Processing
            && self
                .processing_started_at
                .is_none_or(|started| started + stale_after <= now)
    }

    fn transition(&mut self, next: PrizeStatus, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Takes the per-record lease: links the escrow and marks the record
    /// `processing`. A stale `processing` record is re-leased in place.
    pub fn claim(
        &mut self,
        escrow_id: &str,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Result<(), ClaimRefusal> {
        match self.status {
            PrizeStatus::Paid => return Err(ClaimRefusal::AlreadyPaid),
            PrizeStatus::Processing if !self.is_stale(now, stale_after) => {
                return Err(ClaimRefusal::InProgress);
            }
            PrizeStatus::Processing => self.updated_at = now,
            PrizeStatus::PendingFunds | PrizeStatus::Failed => {
                self.status = PrizeStatus::Processing;
                self.updated_at = now;
            }
        }
        self.escrow_record_id = Some(escrow_id.to_string());
        self.processing_started_at = Some(now);
        Ok(())
    }

    pub fn mark_paid(
        &mut self,
        transfer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if transfer_id.is_empty() {
            return Err(LedgerError::Backend(format!(
                "prize {} cannot be paid without a transfer id",
                self.id
            )));
        }
        self.transition(PrizeStatus::Paid, now)?;
        self.transfer_id = Some(transfer_id.to_string());
        self.paid_at = Some(now);
        self.failure_reason = None;
        self.auto_retry_eligible = false;
        Ok(())
    }

    /// Recoverable: the sweep will retry once funds allow.
    pub fn mark_pending_funds(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.transition(PrizeStatus::PendingFunds, now)?;
        self.failure_reason = Some(reason.into());
        self.auto_retry_eligible = true;
        Ok(())
    }

    /// Terminal until an operator intervenes.
    pub fn mark_failed(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.transition(PrizeStatus::Failed, now)?;
        self.failure_reason = Some(reason.into());
        self.auto_retry_eligible = false;
        Ok(())
    }
}
