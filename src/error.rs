use crate::domain::money::Amount;
use crate::domain::prize::PrizeStatus;
use crate::domain::provider::{Rejection, TransferStatus};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`LedgerStore`](crate::domain::ports::LedgerStore) adapter.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("escrow {escrow_id} cannot cover {amount}: {remaining} remaining")]
    Overdrawn {
        escrow_id: String,
        amount: Amount,
        remaining: Amount,
    },
    #[error("prize {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: PrizeStatus,
        to: PrizeStatus,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Backend(e.to_string())
    }
}

/// Errors surfaced by a [`PaymentProvider`](crate::domain::ports::PaymentProvider).
///
/// Provider-specific error payloads are mapped into [`Rejection`] at the adapter
/// boundary so that the core only ever matches on a closed set of kinds.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider rejected the request: {0}")]
    Rejected(Rejection),
    #[error("provider unreachable: {0}")]
    Transport(String),
    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),
}

/// How a failed payout should be treated by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Operator action required; never retried automatically.
    Terminal,
    /// Retried by the sweep once funds allow.
    Transient,
    /// A transfer may or may not exist; reprocessing reconciles it.
    OutcomeUnknown,
}

/// The structured failure of a single `process_payout` call.
#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("prize {0} not found")]
    PrizeNotFound(String),
    #[error("no payout account")]
    NoPayoutAccount,
    #[error("no escrow funds available")]
    NoEscrowFunds,
    #[error("prize {0} is already being processed")]
    InProgress(String),
    #[error("insufficient platform funds: {reason}")]
    InsufficientFunds { reason: String },
    #[error("transfer rejected: {reason}")]
    TransferRejected { reason: String },
    #[error("transfer outcome unknown: {0}")]
    OutcomeUnknown(ProviderError),
    #[error("transfer {transfer_id} succeeded but the ledger commit failed: {source}")]
    CommitFailed {
        transfer_id: String,
        #[source]
        source: LedgerError,
    },
    #[error("recorded transfer {transfer_id} is {status}")]
    TransferNotSettled {
        transfer_id: String,
        status: TransferStatus,
    },
    #[error("recorded transfer {recorded} does not match replayed transfer {replayed}")]
    ReconciliationMismatch { recorded: String, replayed: String },
    #[error("prize {0} is paid but carries no transfer id")]
    MissingTransferId(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl PayoutError {
    pub fn class(&self) -> FailureClass {
        match self {
            PayoutError::InProgress(_)
            | PayoutError::InsufficientFunds { .. }
            | PayoutError::Ledger(_) => FailureClass::Transient,
            PayoutError::OutcomeUnknown(_) | PayoutError::CommitFailed { .. } => {
                FailureClass::OutcomeUnknown
            }
            PayoutError::PrizeNotFound(_)
            | PayoutError::NoPayoutAccount
            | PayoutError::NoEscrowFunds
            | PayoutError::TransferRejected { .. }
            | PayoutError::TransferNotSettled { .. }
            | PayoutError::ReconciliationMismatch { .. }
            | PayoutError::MissingTransferId(_) => FailureClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::Terminal
    }

    /// Caller-facing reason. Transport and storage failures carry URLs and
    /// backend detail, so those render as fixed text; logs keep the full error.
    pub fn sanitized_reason(&self) -> String {
        match self {
            PayoutError::OutcomeUnknown(ProviderError::Timeout(_)) => {
                "transfer outcome unknown: provider timed out".to_string()
            }
            PayoutError::OutcomeUnknown(_) => {
                "transfer outcome unknown: provider unreachable".to_string()
            }
            PayoutError::CommitFailed { transfer_id, .. } => {
                format!("transfer {transfer_id} succeeded but the ledger commit failed")
            }
            PayoutError::Ledger(_) => "ledger unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

/// Failures that stop a sweep before any pool is looked at.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("balance unavailable: {0}")]
    Balance(#[from] ProviderError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Errors of the binary surfaces: configuration, seeding and reporting.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
