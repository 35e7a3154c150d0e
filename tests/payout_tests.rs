mod common;

use async_trait::async_trait;
use common::{Harness, reclaim_settings, settings};
use prize_payouts::application::audit::AuditLog;
use prize_payouts::application::processor::PayoutProcessor;
use prize_payouts::domain::audit::{AuditEntry, AuditEvent};
use prize_payouts::domain::escrow::EscrowStatus;
use prize_payouts::domain::money::Amount;
use prize_payouts::domain::ports::{AuditSink, LedgerStore};
use prize_payouts::domain::prize::{PrizeRecord, PrizeStatus};
use prize_payouts::domain::provider::{Rejection, RejectionKind};
use prize_payouts::domain::winner::WinnerProfile;
use prize_payouts::error::{FailureClass, LedgerError, PayoutError, ProviderError, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_single_prize_is_paid_from_escrow() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;

    let receipt = h.processor().process_payout("prize-1").await.unwrap();
    assert!(!receipt.already_paid);
    assert_eq!(receipt.amount, Amount::new(5000));

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Paid);
    assert_eq!(prize.transfer_id.as_deref(), Some(receipt.transfer_id.as_str()));
    assert_eq!(prize.escrow_record_id.as_deref(), Some("escrow-pool-1"));
    assert!(prize.paid_at.is_some());

    let escrow = h.escrow("pool-1").await;
    assert_eq!(escrow.distributed_amount, Amount::new(5000));
    assert_eq!(escrow.status, EscrowStatus::Distributed);
    assert_eq!(escrow.distributed_to.len(), 1);
    assert_eq!(escrow.distributed_to[0].transfer_id, receipt.transfer_id);

    let winner = h.ledger.winner("payee-prize-1").await.unwrap().unwrap();
    assert_eq!(winner.prizes.len(), 1);
    assert_eq!(winner.prizes[0].status, PrizeStatus::Paid);
    assert_eq!(h.provider.available().await, Amount::new(5000));

    let events = h.events().await;
    assert!(events.iter().any(|e| matches!(e, AuditEvent::PayoutSucceeded { prize_id, .. } if prize_id == "prize-1")));
}

#[tokio::test]
async fn test_transfer_metadata_and_key() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 2).await;

    h.processor().process_payout("prize-1").await.unwrap();

    let requests = h.provider.requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.destination, "acct_prize-1");
    assert_eq!(request.currency, "usd");
    assert!(request.idempotency_key.starts_with("prize_payout_"));
    assert_eq!(request.metadata["type"], "prize_payout");
    assert_eq!(request.metadata["prize_id"], "prize-1");
    assert_eq!(request.metadata["placement"], "2");
    assert_eq!(request.metadata["escrow_id"], "escrow-pool-1");
}

#[tokio::test]
async fn test_paid_prize_is_not_paid_twice() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    let processor = h.processor();

    let first = processor.process_payout("prize-1").await.unwrap();
    let second = processor.process_payout("prize-1").await.unwrap();

    assert!(second.already_paid);
    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(h.provider.transfer_count().await, 1);
    assert_eq!(h.escrow("pool-1").await.distributed_amount, Amount::new(5000));
}

#[tokio::test]
async fn test_missing_prize() {
    let h = Harness::new(10000);
    let result = h.processor().process_payout("ghost").await;
    assert!(matches!(result, Err(PayoutError::PrizeNotFound(id)) if id == "ghost"));
}

#[tokio::test]
async fn test_missing_payout_account_fails_terminally() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.ledger
        .put_winner(WinnerProfile::new("payee-1").with_payout_account("  "))
        .await
        .unwrap();
    h.ledger
        .put_prize(PrizeRecord::new("prize-1", "pool-1", "payee-1", "Ada", Amount::new(5000), 1))
        .await
        .unwrap();

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::NoPayoutAccount));
    assert_eq!(err.class(), FailureClass::Terminal);

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Failed);
    assert_eq!(prize.failure_reason.as_deref(), Some("no payout account"));
    assert!(!prize.auto_retry_eligible);
    assert!(h.provider.requests().await.is_empty());
}

#[tokio::test]
async fn test_missing_escrow_fails_terminally() {
    let h = Harness::new(10000);
    h.seed_pool_with("pool-1", true, None).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::NoEscrowFunds));

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Failed);
    assert_eq!(prize.failure_reason.as_deref(), Some("no escrow funds available"));
    assert!(h.provider.requests().await.is_empty());
}

#[tokio::test]
async fn test_escrow_shortfall_is_refused_before_any_transfer() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-a", "pool-1", 3000, 1).await;
    h.seed_prize("prize-b", "pool-1", 3000, 2).await;
    let processor = h.processor();

    processor.process_payout("prize-a").await.unwrap();
    let err = processor.process_payout("prize-b").await.unwrap_err();
    assert!(matches!(err, PayoutError::NoEscrowFunds));
    assert_eq!(err.class(), FailureClass::Terminal);

    assert_eq!(h.provider.transfer_count().await, 1);
    assert_eq!(h.provider.available().await, Amount::new(7000));
    let prize = h.prize("prize-b").await;
    assert_eq!(prize.status, PrizeStatus::Failed);
    assert_eq!(prize.failure_reason.as_deref(), Some("no escrow funds available"));
    let escrow = h.escrow("pool-1").await;
    assert_eq!(escrow.distributed_amount, Amount::new(3000));
    assert!(escrow.is_conserved());
}

#[tokio::test]
async fn test_insufficient_platform_funds_defers_to_sweep() {
    let h = Harness::new(1000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::InsufficientFunds { .. }));
    assert!(err.is_retryable());

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::PendingFunds);
    assert!(prize.auto_retry_eligible);
    assert_eq!(
        prize.failure_reason.as_deref(),
        Some("code=balance_insufficient type=invalid_request_error")
    );
    assert!(prize.transfer_id.is_none());

    let escrow = h.escrow("pool-1").await;
    assert_eq!(escrow.distributed_amount, Amount::ZERO);
    assert_eq!(escrow.status, EscrowStatus::Held);

    let events = h.events().await;
    assert!(events.iter().any(|e| matches!(e, AuditEvent::BalanceShortfall { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        AuditEvent::PayoutFailed { class: FailureClass::Transient, .. }
    )));
}

#[tokio::test]
async fn test_rejected_transfer_fails_with_sanitized_reason() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    h.provider
        .fail_next_transfer(ProviderError::Rejected(
            Rejection::new(RejectionKind::Other)
                .with_code("account_invalid")
                .with_message("No such destination: acct_prize-1"),
        ))
        .await;

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::TransferRejected { .. }));
    assert!(!err.to_string().contains("No such destination"));

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Failed);
    assert_eq!(prize.failure_reason.as_deref(), Some("code=account_invalid"));
    assert!(!prize.auto_retry_eligible);

    // A manual trigger may retry a failed record once the cause is fixed.
    let receipt = h.processor().process_payout("prize-1").await.unwrap();
    assert_eq!(h.prize("prize-1").await.transfer_id, Some(receipt.transfer_id));
}

#[tokio::test]
async fn test_key_conflict_retries_once_with_suffixed_key() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    h.provider
        .fail_next_transfer(ProviderError::Rejected(Rejection::idempotency_conflict()))
        .await;

    h.processor().process_payout("prize-1").await.unwrap();

    let requests = h.provider.requests().await;
    assert_eq!(requests.len(), 2);
    let base = &requests[0].idempotency_key;
    let retry = &requests[1].idempotency_key;
    assert!(retry.starts_with(&format!("{base}_")));
    assert_eq!(h.provider.transfer_count().await, 1);
}

#[tokio::test]
async fn test_second_key_conflict_fails() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    for _ in 0..2 {
        h.provider
            .fail_next_transfer(ProviderError::Rejected(Rejection::idempotency_conflict()))
            .await;
    }

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::TransferRejected { .. }));
    assert_eq!(h.provider.requests().await.len(), 2);
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Failed);
}

#[tokio::test]
async fn test_timeout_leaves_record_processing_then_replay_collapses() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    h.provider.set_latency(Duration::from_millis(500)).await;

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::OutcomeUnknown(ProviderError::Timeout(_))));
    assert_eq!(err.class(), FailureClass::OutcomeUnknown);

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Processing);
    assert!(prize.transfer_id.is_none());
    // The provider booked the transfer even though the answer was lost.
    assert_eq!(h.provider.transfer_count().await, 1);

    // Within the staleness window the record is left alone.
    let busy = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(busy, PayoutError::InProgress(_)));

    h.provider.set_latency(Duration::ZERO).await;
    let receipt = h
        .processor_with(reclaim_settings())
        .process_payout("prize-1")
        .await
        .unwrap();

    assert_eq!(receipt.transfer_id, "tr_sandbox_1");
    assert_eq!(h.provider.transfer_count().await, 1);
    assert_eq!(h.provider.available().await, Amount::new(5000));
    let requests = h.provider.requests().await;
    assert_eq!(requests[0].idempotency_key, requests[1].idempotency_key);
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Paid);
    assert_eq!(h.escrow("pool-1").await.distributed_amount, Amount::new(5000));
}

#[tokio::test]
async fn test_lost_answer_to_conflict_retry_is_replayed_under_retry_key() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    h.provider
        .fail_next_transfer(ProviderError::Rejected(Rejection::idempotency_conflict()))
        .await;
    h.provider.set_latency(Duration::from_millis(500)).await;

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::OutcomeUnknown(ProviderError::Timeout(_))));
    assert_eq!(h.provider.transfer_count().await, 1);
    let requests = h.provider.requests().await;
    let retry_key = requests[1].idempotency_key.clone();
    assert_ne!(requests[0].idempotency_key, retry_key);
    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Processing);
    assert_eq!(prize.idempotency_key.as_deref(), Some(retry_key.as_str()));

    h.provider.set_latency(Duration::ZERO).await;
    let receipt = h
        .processor_with(reclaim_settings())
        .process_payout("prize-1")
        .await
        .unwrap();

    assert_eq!(receipt.transfer_id, "tr_sandbox_1");
    assert_eq!(h.provider.transfer_count().await, 1);
    assert_eq!(h.provider.available().await, Amount::new(5000));
    let requests = h.provider.requests().await;
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].idempotency_key, retry_key);
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Paid);
    assert_eq!(h.escrow("pool-1").await.distributed_amount, Amount::new(5000));
}

#[tokio::test]
async fn test_reclaim_without_payout_account_is_flagged_not_failed() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    h.provider.set_latency(Duration::from_millis(500)).await;
    assert!(h.processor().process_payout("prize-1").await.is_err());
    h.provider.set_latency(Duration::ZERO).await;

    // The payee drops their account while the transfer's outcome is unknown.
    h.ledger
        .put_winner(WinnerProfile::new("payee-prize-1"))
        .await
        .unwrap();
    let err = h
        .processor_with(reclaim_settings())
        .process_payout("prize-1")
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::NoPayoutAccount));

    let prize = h.prize("prize-1").await;
    assert_eq!(prize.status, PrizeStatus::Processing);
    assert!(prize.failure_reason.is_none());
    assert_eq!(prize.escrow_record_id.as_deref(), Some("escrow-pool-1"));
    assert_eq!(h.provider.requests().await.len(), 1);
    let events = h.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        AuditEvent::ReconciliationAnomaly { prize_id, .. } if prize_id == "prize-1"
    )));
}

#[tokio::test]
async fn test_transport_error_is_outcome_unknown() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    h.provider
        .fail_next_transfer(ProviderError::Transport("connection reset".into()))
        .await;

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::OutcomeUnknown(ProviderError::Transport(_))));
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Processing);

    h.processor_with(reclaim_settings())
        .process_payout("prize-1")
        .await
        .unwrap();
    assert_eq!(h.provider.transfer_count().await, 1);
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Paid);
}

#[tokio::test]
async fn test_reversed_transfer_is_reported() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    let receipt = h.processor().process_payout("prize-1").await.unwrap();

    h.provider.reverse(&receipt.transfer_id).await;
    let err = h.processor().process_payout("prize-1").await.unwrap_err();

    assert!(matches!(err, PayoutError::TransferNotSettled { .. }));
    assert_eq!(err.class(), FailureClass::Terminal);
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Paid);
    assert_eq!(h.provider.transfer_count().await, 1);
    let events = h.events().await;
    assert!(events.iter().any(|e| matches!(e, AuditEvent::ReconciliationAnomaly { .. })));
}

#[tokio::test]
async fn test_unconfirmed_paid_record_is_replayed_under_same_key() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    let first = h.processor().process_payout("prize-1").await.unwrap();

    h.provider.set_lookups_fail(true).await;
    let second = h.processor().process_payout("prize-1").await.unwrap();

    assert!(second.already_paid);
    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(h.provider.transfer_count().await, 1);
    assert_eq!(h.provider.requests().await.len(), 2);
}

#[tokio::test]
async fn test_paid_record_without_transfer_id_is_an_error() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    let mut prize = PrizeRecord::new("prize-1", "pool-1", "payee-1", "Ada", Amount::new(5000), 1);
    prize.status = PrizeStatus::Paid;
    h.ledger.put_prize(prize).await.unwrap();

    let err = h.processor().process_payout("prize-1").await.unwrap_err();
    assert!(matches!(err, PayoutError::MissingTransferId(_)));
    assert!(h.provider.requests().await.is_empty());
}

struct BrokenSink;

#[async_trait]
impl AuditSink for BrokenSink {
    async fn append(&self, _entry: AuditEntry) -> Result<()> {
        Err(LedgerError::Backend("audit store offline".into()))
    }
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_payout() {
    let h = Harness::new(10000);
    h.seed_pool("pool-1", 5000).await;
    h.seed_prize("prize-1", "pool-1", 5000, 1).await;
    let audit = AuditLog::spawn(Arc::new(BrokenSink), 1);
    let processor = PayoutProcessor::new(
        h.ledger.clone(),
        Arc::new(h.provider.clone()),
        audit.clone(),
        settings(),
    );

    processor.process_payout("prize-1").await.unwrap();
    audit.flush().await;
    assert_eq!(h.prize("prize-1").await.status, PrizeStatus::Paid);
}
