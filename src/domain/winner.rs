use super::money::Amount;
use super::prize::PrizeStatus;
use serde::{Deserialize, Serialize};

/// One prize outcome in a payee's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerEntry {
    pub pool_id: String,
    pub placement: u32,
    pub status: PrizeStatus,
    #[serde(default)]
    pub transfer_id: Option<String>,
    pub amount: Amount,
}

/// Denormalized per-payee prize history, plus where to send their money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerProfile {
    pub payee_id: String,
    /// External payout account at the payment provider, once registered.
    #[serde(default)]
    pub payout_account_id: Option<String>,
    #[serde(default)]
    pub prizes: Vec<WinnerEntry>,
}

impl WinnerProfile {
    pub fn new(payee_id: impl Into<String>) -> Self {
        Self {
            payee_id: payee_id.into(),
            payout_account_id: None,
            prizes: Vec::new(),
        }
    }

    pub fn with_payout_account(mut self, account_id: impl Into<String>) -> Self {
        self.payout_account_id = Some(account_id.into());
        self
    }

    /// Registered payout account, ignoring blank values.
    pub fn payout_account(&self) -> Option<&str> {
        self.payout_account_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Updates the entry for `(pool_id, placement)` in place, or appends it.
    pub fn upsert(&mut self, entry: WinnerEntry) {
        match self
            .prizes
            .iter_mut()
            .find(|e| e.pool_id == entry.pool_id && e.placement == entry.placement)
        {
            Some(existing) => *existing = entry,
            None => self.prizes.push(entry),
        }
    }
}
