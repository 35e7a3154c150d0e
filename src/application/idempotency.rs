use crate::domain::money::Amount;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Deterministic key for one prize transfer.
///
/// Any replay of the same payout (same record, destination, amount and escrow)
/// produces the same key, which the provider collapses into a single transfer.
pub fn transfer_key(
    prize_id: &str,
    destination: &str,
    amount: Amount,
    escrow_id: &str,
) -> String {
    let amount = amount.minor_units().to_string();
    let mut hasher = Sha256::new();
    for part in [prize_id, destination, amount.as_str(), escrow_id] {
        hasher.update(part.as_bytes());
        hasher.update([0x1fu8]);
    }
    let digest = hasher.finalize();
    format!("prize_payout_{}", hex::encode(&digest[..16]))
}

/// Key used for the single retry after the provider reports a key conflict.
pub fn conflict_retry_key(base: &str, at: DateTime<Utc>) -> String {
    format!("{base}_{}", at.timestamp_millis())
}
