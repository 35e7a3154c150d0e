//! Payment provider speaking the Stripe REST dialect for balances and
//! connected-account transfers.

use crate::domain::money::Amount;
use crate::domain::ports::PaymentProvider;
use crate::domain::provider::{
    ProviderBalance, Rejection, RejectionKind, Transfer, TransferRequest, TransferStatus,
};
use crate::error::{AppError, ProviderError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    available: Vec<BalanceEntry>,
    #[serde(default)]
    pending: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    id: String,
    amount: u64,
    #[serde(default)]
    reversed: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

pub struct StripeProvider {
    client: Client,
    base_url: String,
    secret_key: String,
    timeout: Duration,
}

impl StripeProvider {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            timeout,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        debug!(%status, "provider responded");

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| ProviderError::Transport(format!("malformed provider response: {e}")));
        }
        if status.is_server_error() {
            // The request may have been executed; only a replay can tell.
            return Err(ProviderError::Transport(format!("provider returned {status}")));
        }
        Err(ProviderError::Rejected(parse_rejection(status, &body)))
    }

    fn transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Maps a provider error body onto the closed [`RejectionKind`] set.
fn parse_rejection(status: StatusCode, body: &str) -> Rejection {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_default();

    let kind = match (error.code.as_deref(), error.error_type.as_deref()) {
        (Some("balance_insufficient" | "insufficient_funds"), _) => RejectionKind::InsufficientFunds,
        (_, Some("idempotency_error")) => RejectionKind::IdempotencyConflict,
        _ if status == StatusCode::CONFLICT => RejectionKind::IdempotencyConflict,
        _ => RejectionKind::Other,
    };

    Rejection {
        kind,
        code: error.code,
        error_type: error.error_type,
        decline_code: error.decline_code,
        message: error.message,
    }
}

fn sum_currency(entries: &[BalanceEntry], currency: &str) -> Amount {
    entries
        .iter()
        .filter(|e| e.currency.eq_ignore_ascii_case(currency))
        .map(|e| Amount::new(u64::try_from(e.amount).unwrap_or(0)))
        .sum()
}

impl From<TransferResponse> for Transfer {
    fn from(response: TransferResponse) -> Self {
        let status = if response.reversed {
            TransferStatus::Reversed
        } else {
            TransferStatus::Paid
        };
        Transfer {
            id: response.id,
            amount: Amount::new(response.amount),
            status,
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn available_balance(&self, currency: &str) -> Result<ProviderBalance, ProviderError> {
        let url = format!("{}/v1/balance", self.base_url);
        let balance: BalanceResponse = self.send(self.client.get(url)).await?;
        Ok(ProviderBalance {
            available: sum_currency(&balance.available, currency),
            pending: sum_currency(&balance.pending, currency),
        })
    }

    async fn create_transfer(&self, request: &TransferRequest) -> Result<Transfer, ProviderError> {
        let url = format!("{}/v1/transfers", self.base_url);
        let mut form = vec![
            ("amount".to_string(), request.amount.minor_units().to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("destination".to_string(), request.destination.clone()),
        ];
        form.extend(
            request
                .metadata
                .iter()
                .map(|(k, v)| (format!("metadata[{k}]"), v.clone())),
        );

        let builder = self
            .client
            .post(url)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form);
        let transfer: TransferResponse = self.send(builder).await?;
        Ok(transfer.into())
    }

    async fn transfer(&self, transfer_id: &str) -> Result<Transfer, ProviderError> {
        let url = format!("{}/v1/transfers/{}", self.base_url, transfer_id);
        let transfer: TransferResponse = self.send(self.client.get(url)).await?;
        Ok(transfer.into())
    }
}
