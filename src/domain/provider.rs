//! Value types exchanged with the payment provider.

use super::money::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Closed set of rejection kinds the core reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The platform's settlement balance cannot cover the transfer.
    InsufficientFunds,
    /// The idempotency key was already used with different parameters.
    IdempotencyConflict,
    Other,
}

/// A request the provider received and refused.
///
/// `message` may carry provider-internal detail and is never rendered by
/// `Display` nor persisted; use [`Rejection::sanitized_reason`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub code: Option<String>,
    pub error_type: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}

impl Rejection {
    pub fn new(kind: RejectionKind) -> Self {
        Self {
            kind,
            code: None,
            error_type: None,
            decline_code: None,
            message: None,
        }
    }

    pub fn insufficient_funds() -> Self {
        Self::new(RejectionKind::InsufficientFunds)
            .with_code("balance_insufficient")
            .with_type("invalid_request_error")
    }

    pub fn idempotency_conflict() -> Self {
        Self::new(RejectionKind::IdempotencyConflict).with_type("idempotency_error")
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_decline_code(mut self, decline_code: impl Into<String>) -> Self {
        self.decline_code = Some(decline_code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Failure reason safe to persist and show to payees and pool owners.
    pub fn sanitized_reason(&self) -> String {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("code={code}"));
        }
        if let Some(error_type) = &self.error_type {
            parts.push(format!("type={error_type}"));
        }
        if let Some(decline_code) = &self.decline_code {
            parts.push(format!("decline_code={decline_code}"));
        }
        if parts.is_empty() {
            let kind = match self.kind {
                RejectionKind::InsufficientFunds => "insufficient_funds",
                RejectionKind::IdempotencyConflict => "idempotency_conflict",
                RejectionKind::Other => "transfer_rejected",
            };
            return kind.to_string();
        }
        parts.join(" ")
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sanitized_reason())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Paid,
    Failed,
    Reversed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Paid => "paid",
            TransferStatus::Failed => "failed",
            TransferStatus::Reversed => "reversed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub amount: Amount,
    pub status: TransferStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub destination: String,
    pub amount: Amount,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderBalance {
    pub available: Amount,
    pub pending: Amount,
}
