use crate::domain::money::Amount;
use crate::domain::ports::PaymentProvider;
use crate::domain::provider::{
    ProviderBalance, Rejection, Transfer, TransferRequest, TransferStatus,
};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Parameters that must match for a reused idempotency key to be honoured.
#[derive(Debug, Clone, PartialEq)]
struct Fingerprint {
    destination: String,
    amount: Amount,
    currency: String,
}

impl From<&TransferRequest> for Fingerprint {
    fn from(request: &TransferRequest) -> Self {
        Self {
            destination: request.destination.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
        }
    }
}

#[derive(Default)]
struct SandboxState {
    available: Amount,
    pending: Amount,
    transfers: HashMap<String, Transfer>,
    keys: HashMap<String, (Fingerprint, String)>,
    requests: Vec<TransferRequest>,
    scripted_failures: VecDeque<ProviderError>,
    lookups_fail: bool,
    latency: Duration,
    next_id: u64,
}

/// An in-process payment provider with real idempotency-key semantics.
///
/// Used when no live provider is configured and throughout the tests. A
/// transfer is booked before any configured latency elapses, so a caller that
/// times out has still moved money, just like a lost response from a real API.
#[derive(Clone, Default)]
pub struct SandboxProvider {
    state: Arc<Mutex<SandboxState>>,
}

impl SandboxProvider {
    pub fn new(available: Amount) -> Self {
        Self {
            state: Arc::new(Mutex::new(SandboxState {
                available,
                ..SandboxState::default()
            })),
        }
    }

    pub async fn set_available(&self, available: Amount) {
        self.state.lock().await.available = available;
    }

    pub async fn available(&self) -> Amount {
        self.state.lock().await.available
    }

    /// The next `create_transfer` call fails with `error` before touching any state.
    pub async fn fail_next_transfer(&self, error: ProviderError) {
        self.state.lock().await.scripted_failures.push_back(error);
    }

    pub async fn set_lookups_fail(&self, fail: bool) {
        self.state.lock().await.lookups_fail = fail;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Marks a booked transfer as reversed.
    pub async fn reverse(&self, transfer_id: &str) {
        if let Some(transfer) = self.state.lock().await.transfers.get_mut(transfer_id) {
            transfer.status = TransferStatus::Reversed;
        }
    }

    /// Number of distinct transfers booked.
    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    /// Every `create_transfer` request received, including replays and failures.
    pub async fn requests(&self) -> Vec<TransferRequest> {
        self.state.lock().await.requests.clone()
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    async fn available_balance(&self, _currency: &str) -> Result<ProviderBalance, ProviderError> {
        let state = self.state.lock().await;
        Ok(ProviderBalance {
            available: state.available,
            pending: state.pending,
        })
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<Transfer, ProviderError> {
        let (transfer, latency) = {
            let mut state = self.state.lock().await;
            state.requests.push(request.clone());
            if let Some(error) = state.scripted_failures.pop_front() {
                return Err(error);
            }

            let fingerprint = Fingerprint::from(request);
            let replayed = match state.keys.get(&request.idempotency_key) {
                Some((seen, _)) if *seen != fingerprint => {
                    return Err(ProviderError::Rejected(Rejection::idempotency_conflict()));
                }
                Some((_, transfer_id)) => state.transfers.get(transfer_id).cloned(),
                None => None,
            };

            let transfer = match replayed {
                Some(transfer) => transfer,
                None => {
                    if request.amount > state.available {
                        return Err(ProviderError::Rejected(Rejection::insufficient_funds()));
                    }
                    state.available = state.available.saturating_sub(request.amount);
                    state.next_id += 1;
                    let transfer = Transfer {
                        id: format!("tr_sandbox_{}", state.next_id),
                        amount: request.amount,
                        status: TransferStatus::Paid,
                    };
                    state
                        .transfers
                        .insert(transfer.id.clone(), transfer.clone());
                    state.keys.insert(
                        request.idempotency_key.clone(),
                        (fingerprint, transfer.id.clone()),
                    );
                    transfer
                }
            };
            (transfer, state.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(transfer)
    }

    async fn transfer(&self, transfer_id: &str) -> Result<Transfer, ProviderError> {
        let state = self.state.lock().await;
        if state.lookups_fail {
            return Err(ProviderError::Transport("sandbox lookup unavailable".into()));
        }
        state.transfers.get(transfer_id).cloned().ok_or_else(|| {
            ProviderError::Rejected(
                Rejection::new(crate::domain::provider::RejectionKind::Other)
                    .with_code("resource_missing"),
            )
        })
    }
}
