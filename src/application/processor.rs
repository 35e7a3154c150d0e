use super::audit::AuditLog;
use super::idempotency::{conflict_retry_key, transfer_key};
use crate::domain::audit::AuditEvent;
use crate::domain::commit::{CommitOutcome, PayoutCommit};
use crate::domain::escrow::EscrowRecord;
use crate::domain::money::Amount;
use crate::domain::ports::{LedgerStoreRef, PaymentProviderRef};
use crate::domain::prize::{PrizeRecord, PrizeStatus};
use crate::domain::provider::{RejectionKind, Transfer, TransferRequest, TransferStatus};
use crate::error::{LedgerError, PayoutError, ProviderError};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables for the payout processor.
#[derive(Debug, Clone)]
pub struct PayoutSettings {
    pub currency: String,
    /// Upper bound on any single payment-provider call.
    pub provider_timeout: Duration,
    /// A `processing` record older than this is reconciled on the next attempt.
    pub stale_after: chrono::Duration,
}

impl Default for PayoutSettings {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            provider_timeout: Duration::from_secs(30),
            stale_after: chrono::Duration::minutes(15),
        }
    }
}

/// Successful result of [`PayoutProcessor::process_payout`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutReceipt {
    pub prize_id: String,
    pub transfer_id: String,
    pub amount: Amount,
    /// The record was already paid; no new money moved.
    pub already_paid: bool,
}

/// Moves one prize record from owed to paid.
///
/// Safe to call concurrently for different records. For the same record, the
/// compare-and-set lease lets exactly one caller proceed past the claim and the
/// stored idempotency key collapses any replayed transfer.
#[derive(Clone)]
pub struct PayoutProcessor {
    ledger: LedgerStoreRef,
    provider: PaymentProviderRef,
    audit: AuditLog,
    settings: PayoutSettings,
}

impl PayoutProcessor {
    pub fn new(
        ledger: LedgerStoreRef,
        provider: PaymentProviderRef,
        audit: AuditLog,
        settings: PayoutSettings,
    ) -> Self {
        Self {
            ledger,
            provider,
            audit,
            settings,
        }
    }

    pub fn ledger(&self) -> &LedgerStoreRef {
        &self.ledger
    }

    pub fn provider(&self) -> &PaymentProviderRef {
        &self.provider
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn settings(&self) -> &PayoutSettings {
        &self.settings
    }

    /// Pays out the record identified by `prize_id`.
    ///
    /// Amounts and destinations are always re-read from the ledger.
    pub async fn process_payout(&self, prize_id: &str) -> Result<PayoutReceipt, PayoutError> {
        let prize = self
            .ledger
            .prize(prize_id)
            .await?
            .ok_or_else(|| PayoutError::PrizeNotFound(prize_id.to_string()))?;
        let pool_id = prize.pool_id.clone();

        let result = self.run(prize).await;
        if let Err(e) = &result {
            warn!(prize_id = %prize_id, pool_id = %pool_id, class = ?e.class(), error = %e, "payout failed");
            self.audit.record(AuditEvent::PayoutFailed {
                prize_id: prize_id.to_string(),
                pool_id,
                class: e.class(),
                reason: e.sanitized_reason(),
            });
        }
        result
    }

    async fn run(&self, prize: PrizeRecord) -> Result<PayoutReceipt, PayoutError> {
        match prize.status {
            PrizeStatus::Paid => return self.reconcile_paid(prize).await,
            PrizeStatus::Processing if !prize.is_stale(Utc::now(), self.settings.stale_after) => {
                return Err(PayoutError::InProgress(prize.id));
            }
            PrizeStatus::Processing => {
                info!(prize_id = %prize.id, "reclaiming stale processing record");
            }
            PrizeStatus::PendingFunds | PrizeStatus::Failed => {}
        }

        let Some(destination) = self.payout_account(&prize.payee_id).await? else {
            return Err(self.refuse(prize, PayoutError::NoPayoutAccount).await);
        };
        let Some(escrow) = self.resolve_escrow(&prize).await? else {
            return Err(self.refuse(prize, PayoutError::NoEscrowFunds).await);
        };

        let prize = self.claim(prize, &escrow, &destination).await?;
        // Prize payouts carry no platform fee.
        let amount = prize.owed_amount;
        self.check_balance(&prize, amount).await;

        let request = self.transfer_request(&prize, destination, &escrow.id);
        let (prize, result) = self.create_transfer(prize, request).await;
        match result {
            Ok(transfer) => self.commit(prize, &escrow.id, transfer).await,
            Err(e) => Err(self.record_transfer_failure(prize, e).await),
        }
    }

    async fn payout_account(&self, payee_id: &str) -> Result<Option<String>, PayoutError> {
        let winner = self.ledger.winner(payee_id).await?;
        Ok(winner.and_then(|w| w.payout_account().map(String::from)))
    }

    /// A reclaimed record keeps its linked escrow so the replayed key matches.
    async fn resolve_escrow(
        &self,
        prize: &PrizeRecord,
    ) -> Result<Option<EscrowRecord>, PayoutError> {
        if prize.status == PrizeStatus::Processing
            && let Some(escrow_id) = &prize.escrow_record_id
            && let Some(escrow) = self.ledger.escrow(escrow_id).await?
        {
            return Ok(Some(escrow));
        }
        Ok(self.ledger.held_escrow(&prize.pool_id).await?)
    }

    async fn save(&self, prize: PrizeRecord) -> Result<PrizeRecord, PayoutError> {
        let id = prize.id.clone();
        self.ledger.update_prize(prize).await.map_err(|e| match e {
            LedgerError::Conflict { .. } => PayoutError::InProgress(id),
            other => PayoutError::Ledger(other),
        })
    }

    async fn fail_terminal(&self, mut prize: PrizeRecord, reason: &str) -> Result<(), PayoutError> {
        prize.mark_failed(reason, Utc::now())?;
        self.save(prize).await?;
        Ok(())
    }

    /// Fails the record terminally, unless it is a reclaimed attempt that may
    /// already have a booked transfer: that one stays `processing` and is
    /// flagged for reconciliation.
    async fn refuse(&self, prize: PrizeRecord, error: PayoutError) -> PayoutError {
        if prize.status == PrizeStatus::Processing && prize.escrow_record_id.is_some() {
            error!(
                prize_id = %prize.id,
                error = %error,
                "reclaimed record cannot be replayed; left processing"
            );
            self.audit.record(AuditEvent::ReconciliationAnomaly {
                prize_id: prize.id,
                detail: format!("reclaim blocked: {error}"),
            });
            return error;
        }
        match self.fail_terminal(prize, &error.to_string()).await {
            Ok(()) => error,
            Err(e) => e,
        }
    }

    /// Leases the record and reserves its amount against `escrow`. A reclaim
    /// keeps the key of the attempt it is replaying.
    async fn claim(
        &self,
        prize: PrizeRecord,
        escrow: &EscrowRecord,
        destination: &str,
    ) -> Result<PrizeRecord, PayoutError> {
        let reclaimed = prize.status == PrizeStatus::Processing;
        let mut claimed = prize.clone();
        if claimed
            .claim(&escrow.id, Utc::now(), self.settings.stale_after)
            .is_err()
        {
            return Err(PayoutError::InProgress(prize.id));
        }
        if !reclaimed || claimed.idempotency_key.is_none() {
            claimed.idempotency_key = Some(transfer_key(
                &claimed.id,
                destination,
                claimed.owed_amount,
                &escrow.id,
            ));
        }

        match self.ledger.claim_prize(claimed).await {
            Ok(claimed) => {
                debug!(prize_id = %claimed.id, escrow_id = %escrow.id, "prize claimed for processing");
                Ok(claimed)
            }
            Err(LedgerError::Conflict { .. }) => Err(PayoutError::InProgress(prize.id)),
            Err(LedgerError::Overdrawn {
                escrow_id,
                amount,
                remaining,
            }) => {
                warn!(
                    prize_id = %prize.id,
                    escrow_id = %escrow_id,
                    owed = %amount,
                    uncommitted = %remaining,
                    "escrow cannot cover prize"
                );
                Err(self.refuse(prize, PayoutError::NoEscrowFunds).await)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Advisory only: the provider's answer to the transfer is authoritative.
    async fn check_balance(&self, prize: &PrizeRecord, required: Amount) {
        let currency = self.settings.currency.as_str();
        match self.bounded(self.provider.available_balance(currency)).await {
            Ok(balance) if balance.available < required => {
                warn!(
                    prize_id = %prize.id,
                    available = %balance.available,
                    required = %required,
                    "available balance below transfer amount; attempting transfer anyway"
                );
                self.audit.record(AuditEvent::BalanceShortfall {
                    prize_id: prize.id.clone(),
                    available: balance.available,
                    required,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(prize_id = %prize.id, error = %e, "balance check failed; attempting transfer anyway");
            }
        }
    }

    fn transfer_request(
        &self,
        prize: &PrizeRecord,
        destination: String,
        escrow_id: &str,
    ) -> TransferRequest {
        let amount = prize.owed_amount;
        let idempotency_key = match &prize.idempotency_key {
            Some(key) => key.clone(),
            None => transfer_key(&prize.id, &destination, amount, escrow_id),
        };
        let metadata = BTreeMap::from([
            ("type".to_string(), "prize_payout".to_string()),
            ("prize_id".to_string(), prize.id.clone()),
            ("pool_id".to_string(), prize.pool_id.clone()),
            ("payee_id".to_string(), prize.payee_id.clone()),
            ("placement".to_string(), prize.placement.to_string()),
            ("escrow_id".to_string(), escrow_id.to_string()),
        ]);
        TransferRequest {
            idempotency_key,
            destination,
            amount,
            currency: self.settings.currency.clone(),
            metadata,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        let limit = self.settings.provider_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| ProviderError::Timeout(limit))?
    }

    /// Retries once under a fresh key if the provider reports a key conflict.
    /// The fresh key is stored on the record before it is sent, so a lost
    /// answer to the retry is replayed under that key and not a new one.
    async fn create_transfer(
        &self,
        prize: PrizeRecord,
        mut request: TransferRequest,
    ) -> (PrizeRecord, Result<Transfer, ProviderError>) {
        let first = self.bounded(self.provider.create_transfer(&request)).await;
        let conflict = matches!(
            &first,
            Err(ProviderError::Rejected(rejection))
                if rejection.kind == RejectionKind::IdempotencyConflict
        );
        if !conflict {
            return (prize, first);
        }

        let retry_key = conflict_retry_key(&request.idempotency_key, Utc::now());
        let mut keyed = prize.clone();
        keyed.idempotency_key = Some(retry_key.clone());
        let prize = match self.save(keyed).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(prize_id = %prize.id, error = %e, "could not store retry key; not retrying");
                return (prize, first);
            }
        };

        request.idempotency_key = retry_key;
        warn!(
            prize_id = %prize.id,
            idempotency_key = %request.idempotency_key,
            "idempotency key conflict; retrying with a fresh key"
        );
        let retried = self.bounded(self.provider.create_transfer(&request)).await;
        (prize, retried)
    }

    async fn commit(
        &self,
        prize: PrizeRecord,
        escrow_id: &str,
        transfer: Transfer,
    ) -> Result<PayoutReceipt, PayoutError> {
        let commit = PayoutCommit {
            prize_id: prize.id.clone(),
            expected_version: prize.version,
            escrow_id: escrow_id.to_string(),
            transfer_id: transfer.id.clone(),
            amount: prize.owed_amount,
            paid_at: Utc::now(),
        };

        match self.ledger.commit_payout(&commit).await {
            Ok(outcome) => {
                info!(
                    prize_id = %prize.id,
                    pool_id = %prize.pool_id,
                    transfer_id = %transfer.id,
                    amount = %commit.amount,
                    "prize paid"
                );
                if outcome == CommitOutcome::Applied {
                    self.audit.record(AuditEvent::PayoutSucceeded {
                        prize_id: prize.id.clone(),
                        pool_id: prize.pool_id.clone(),
                        transfer_id: transfer.id.clone(),
                        amount: commit.amount,
                    });
                }
                Ok(PayoutReceipt {
                    prize_id: prize.id,
                    transfer_id: transfer.id,
                    amount: commit.amount,
                    already_paid: outcome == CommitOutcome::AlreadyCommitted,
                })
            }
            Err(source) => {
                // The record stays `processing`; a replay after the staleness
                // window lands on the same transfer and retries the commit.
                error!(
                    prize_id = %prize.id,
                    transfer_id = %transfer.id,
                    error = %source,
                    "transfer succeeded but ledger commit failed"
                );
                self.audit.record(AuditEvent::CommitFailed {
                    prize_id: prize.id,
                    transfer_id: transfer.id.clone(),
                });
                Err(PayoutError::CommitFailed {
                    transfer_id: transfer.id,
                    source,
                })
            }
        }
    }

    async fn record_transfer_failure(&self, mut prize: PrizeRecord, e: ProviderError) -> PayoutError {
        let rejection = match e {
            ProviderError::Rejected(rejection) => rejection,
            unknown @ (ProviderError::Transport(_) | ProviderError::Timeout(_)) => {
                warn!(
                    prize_id = %prize.id,
                    error = %unknown,
                    "transfer outcome unknown; record left processing for reconciliation"
                );
                return PayoutError::OutcomeUnknown(unknown);
            }
        };

        let reason = rejection.sanitized_reason();
        let now = Utc::now();
        let (marked, error) = match rejection.kind {
            RejectionKind::InsufficientFunds => (
                prize.mark_pending_funds(reason.clone(), now),
                PayoutError::InsufficientFunds { reason },
            ),
            RejectionKind::IdempotencyConflict | RejectionKind::Other => (
                prize.mark_failed(reason.clone(), now),
                PayoutError::TransferRejected { reason },
            ),
        };
        if let Err(e) = marked {
            return e.into();
        }
        if let Err(e) = self.save(prize).await {
            warn!(error = %e, "could not record transfer failure; record left processing");
        }
        error
    }

    async fn reconcile_paid(&self, prize: PrizeRecord) -> Result<PayoutReceipt, PayoutError> {
        let Some(recorded) = prize.transfer_id.clone().filter(|id| !id.is_empty()) else {
            return Err(PayoutError::MissingTransferId(prize.id));
        };

        match self.bounded(self.provider.transfer(&recorded)).await {
            Ok(transfer) if transfer.status == TransferStatus::Paid => {
                debug!(prize_id = %prize.id, transfer_id = %recorded, "already paid");
                Ok(PayoutReceipt {
                    prize_id: prize.id,
                    transfer_id: recorded,
                    amount: prize.owed_amount,
                    already_paid: true,
                })
            }
            Ok(transfer) if transfer.status != TransferStatus::Pending => {
                error!(
                    prize_id = %prize.id,
                    transfer_id = %recorded,
                    status = %transfer.status,
                    "paid prize has an unsettled transfer"
                );
                self.audit.record(AuditEvent::ReconciliationAnomaly {
                    prize_id: prize.id,
                    detail: format!("transfer {recorded} is {}", transfer.status),
                });
                Err(PayoutError::TransferNotSettled {
                    transfer_id: recorded,
                    status: transfer.status,
                })
            }
            Ok(_) => {
                warn!(prize_id = %prize.id, transfer_id = %recorded, "transfer still pending; replaying");
                self.replay_paid(prize, recorded).await
            }
            Err(e) => {
                warn!(prize_id = %prize.id, error = %e, "could not confirm transfer; replaying");
                self.replay_paid(prize, recorded).await
            }
        }
    }

    /// Re-submits a paid record's transfer under its stored key; the provider
    /// must answer with the recorded transfer.
    async fn replay_paid(
        &self,
        prize: PrizeRecord,
        recorded: String,
    ) -> Result<PayoutReceipt, PayoutError> {
        let destination = self
            .payout_account(&prize.payee_id)
            .await?
            .ok_or(PayoutError::NoPayoutAccount)?;
        let escrow_id = prize
            .escrow_record_id
            .clone()
            .ok_or_else(|| LedgerError::NotFound {
                entity: "escrow link",
                id: prize.id.clone(),
            })?;

        let request = self.transfer_request(&prize, destination, &escrow_id);
        let transfer = self
            .bounded(self.provider.create_transfer(&request))
            .await
            .map_err(PayoutError::OutcomeUnknown)?;

        if transfer.id == recorded {
            return Ok(PayoutReceipt {
                prize_id: prize.id,
                transfer_id: recorded,
                amount: prize.owed_amount,
                already_paid: true,
            });
        }
        error!(
            prize_id = %prize.id,
            recorded = %recorded,
            replayed = %transfer.id,
            "replayed transfer does not match the recorded one"
        );
        self.audit.record(AuditEvent::ReconciliationAnomaly {
            prize_id: prize.id,
            detail: format!("recorded {recorded}, replay returned {}", transfer.id),
        });
        Err(PayoutError::ReconciliationMismatch {
            recorded,
            replayed: transfer.id,
        })
    }
}
