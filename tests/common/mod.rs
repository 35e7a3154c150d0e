#![allow(dead_code)]

use async_trait::async_trait;
use prize_payouts::application::audit::AuditLog;
use prize_payouts::application::processor::{PayoutProcessor, PayoutSettings};
use prize_payouts::domain::audit::AuditEvent;
use prize_payouts::domain::commit::{CommitOutcome, PayoutCommit};
use prize_payouts::domain::escrow::EscrowRecord;
use prize_payouts::domain::money::Amount;
use prize_payouts::domain::pool::{DistributionStatus, PrizePool};
use prize_payouts::domain::ports::LedgerStore;
use prize_payouts::domain::prize::{PrizeRecord, PrizeStatus};
use prize_payouts::domain::winner::WinnerProfile;
use prize_payouts::error::{LedgerError, Result};
use prize_payouts::infrastructure::in_memory::{InMemoryAuditSink, InMemoryLedger};
use prize_payouts::infrastructure::sandbox::SandboxProvider;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn settings() -> PayoutSettings {
    PayoutSettings {
        currency: "usd".into(),
        provider_timeout: Duration::from_millis(200),
        stale_after: chrono::Duration::minutes(15),
    }
}

/// Every `processing` record counts as stale.
pub fn reclaim_settings() -> PayoutSettings {
    PayoutSettings {
        stale_after: chrono::Duration::zero(),
        ..settings()
    }
}

/// An in-memory ledger, a sandbox provider and an audit log wired together.
pub struct Harness {
    pub ledger: Arc<dyn LedgerStore>,
    pub provider: SandboxProvider,
    pub sink: InMemoryAuditSink,
    pub audit: AuditLog,
}

impl Harness {
    pub fn new(available: u64) -> Self {
        Self::with_ledger(Arc::new(InMemoryLedger::new()), available)
    }

    pub fn with_ledger(ledger: Arc<dyn LedgerStore>, available: u64) -> Self {
        let sink = InMemoryAuditSink::new();
        let audit = AuditLog::spawn(Arc::new(sink.clone()), 256);
        Self {
            ledger,
            provider: SandboxProvider::new(Amount::new(available)),
            sink,
            audit,
        }
    }

    pub fn processor(&self) -> PayoutProcessor {
        self.processor_with(settings())
    }

    pub fn processor_with(&self, settings: PayoutSettings) -> PayoutProcessor {
        PayoutProcessor::new(
            self.ledger.clone(),
            Arc::new(self.provider.clone()),
            self.audit.clone(),
            settings,
        )
    }

    /// A host-confirmed pool funded by one held escrow.
    pub async fn seed_pool(&self, pool_id: &str, escrow_total: u64) {
        self.seed_pool_with(pool_id, true, Some(escrow_total)).await;
    }

    pub async fn seed_pool_with(&self, pool_id: &str, host_confirmed: bool, escrow_total: Option<u64>) {
        self.ledger
            .put_pool(PrizePool::new(pool_id, host_confirmed))
            .await
            .unwrap();
        if let Some(total) = escrow_total {
            self.ledger
                .put_escrow(EscrowRecord::new(
                    format!("escrow-{pool_id}"),
                    pool_id,
                    Amount::new(total),
                ))
                .await
                .unwrap();
        }
    }

    /// A pending prize whose payee has a payout account.
    pub async fn seed_prize(&self, id: &str, pool_id: &str, owed: u64, placement: u32) {
        let payee = format!("payee-{id}");
        self.ledger
            .put_winner(WinnerProfile::new(&payee).with_payout_account(format!("acct_{id}")))
            .await
            .unwrap();
        self.ledger
            .put_prize(PrizeRecord::new(id, pool_id, &payee, "Winner", Amount::new(owed), placement))
            .await
            .unwrap();
    }

    pub async fn prize(&self, id: &str) -> PrizeRecord {
        self.ledger.prize(id).await.unwrap().unwrap()
    }

    pub async fn escrow(&self, pool_id: &str) -> EscrowRecord {
        self.ledger
            .escrow(&format!("escrow-{pool_id}"))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.audit.flush().await;
        self.sink.entries().await.into_iter().map(|e| e.event).collect()
    }
}

/// Delegates to an [`InMemoryLedger`] but fails the first `failures` payout commits.
#[derive(Clone)]
pub struct FlakyLedger {
    inner: InMemoryLedger,
    failures: Arc<AtomicUsize>,
}

impl FlakyLedger {
    pub fn failing_commits(failures: usize) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            failures: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn prize(&self, id: &str) -> Result<Option<PrizeRecord>> {
        self.inner.prize(id).await
    }

    async fn prizes(&self) -> Result<Vec<PrizeRecord>> {
        self.inner.prizes().await
    }

    async fn prizes_with_status(&self, pool_id: &str, status: PrizeStatus) -> Result<Vec<PrizeRecord>> {
        self.inner.prizes_with_status(pool_id, status).await
    }

    async fn put_prize(&self, prize: PrizeRecord) -> Result<()> {
        self.inner.put_prize(prize).await
    }

    async fn update_prize(&self, prize: PrizeRecord) -> Result<PrizeRecord> {
        self.inner.update_prize(prize).await
    }

    async fn claim_prize(&self, prize: PrizeRecord) -> Result<PrizeRecord> {
        self.inner.claim_prize(prize).await
    }

    async fn escrow(&self, id: &str) -> Result<Option<EscrowRecord>> {
        self.inner.escrow(id).await
    }

    async fn held_escrow(&self, pool_id: &str) -> Result<Option<EscrowRecord>> {
        self.inner.held_escrow(pool_id).await
    }

    async fn put_escrow(&self, escrow: EscrowRecord) -> Result<()> {
        self.inner.put_escrow(escrow).await
    }

    async fn winner(&self, payee_id: &str) -> Result<Option<WinnerProfile>> {
        self.inner.winner(payee_id).await
    }

    async fn put_winner(&self, winner: WinnerProfile) -> Result<()> {
        self.inner.put_winner(winner).await
    }

    async fn pools_awaiting_distribution(&self) -> Result<Vec<PrizePool>> {
        self.inner.pools_awaiting_distribution().await
    }

    async fn put_pool(&self, pool: PrizePool) -> Result<()> {
        self.inner.put_pool(pool).await
    }

    async fn set_pool_status(&self, pool_id: &str, status: DistributionStatus) -> Result<()> {
        self.inner.set_pool_status(pool_id, status).await
    }

    async fn commit_payout(&self, commit: &PayoutCommit) -> Result<CommitOutcome> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LedgerError::Backend("write timed out".into()));
        }
        self.inner.commit_payout(commit).await
    }
}
