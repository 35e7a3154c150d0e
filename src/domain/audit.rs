use super::money::Amount;
use crate::error::FailureClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome counts for one pool within a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSweepOutcome {
    pub pool_id: String,
    pub group_total: Amount,
    pub attempted: usize,
    pub successes: usize,
    pub failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    PayoutSucceeded {
        prize_id: String,
        pool_id: String,
        transfer_id: String,
        amount: Amount,
    },
    PayoutFailed {
        prize_id: String,
        pool_id: String,
        class: FailureClass,
        reason: String,
    },
    BalanceShortfall {
        prize_id: String,
        available: Amount,
        required: Amount,
    },
    CommitFailed {
        prize_id: String,
        transfer_id: String,
    },
    ReconciliationAnomaly {
        prize_id: String,
        detail: String,
    },
    SweepCompleted {
        balance_available: Amount,
        pools: Vec<PoolSweepOutcome>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            recorded_at: Utc::now(),
            event,
        }
    }
}
