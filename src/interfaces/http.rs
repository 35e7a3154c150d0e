use crate::application::processor::{PayoutProcessor, PayoutReceipt};
use crate::application::sweep::{RetrySweep, SweepSummary};
use crate::error::{FailureClass, PayoutError, SweepError};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ApiState {
    pub processor: PayoutProcessor,
    pub sweep: RetrySweep,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payouts/:prize_id", post(process_payout))
        .route("/sweeps", post(run_sweep))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Success/failure envelope returned by the single-record trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    pub retryable: bool,
    #[serde(default)]
    pub already_paid: bool,
}

impl PayoutEnvelope {
    pub fn from_result(result: &Result<PayoutReceipt, PayoutError>) -> Self {
        match result {
            Ok(receipt) => Self {
                success: true,
                transfer_id: Some(receipt.transfer_id.clone()),
                error: None,
                failure_class: None,
                retryable: false,
                already_paid: receipt.already_paid,
            },
            Err(e) => Self {
                success: false,
                transfer_id: None,
                error: Some(e.sanitized_reason()),
                failure_class: Some(e.class()),
                retryable: e.is_retryable(),
                already_paid: false,
            },
        }
    }
}

fn status_for(result: &Result<PayoutReceipt, PayoutError>) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err(PayoutError::PrizeNotFound(_)) => StatusCode::NOT_FOUND,
        Err(PayoutError::InProgress(_)) => StatusCode::CONFLICT,
        Err(e) => match e.class() {
            FailureClass::Terminal => StatusCode::UNPROCESSABLE_ENTITY,
            FailureClass::Transient | FailureClass::OutcomeUnknown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
    }
}

impl IntoResponse for SweepError {
    fn into_response(self) -> Response {
        let status = match &self {
            SweepError::Balance(_) => StatusCode::BAD_GATEWAY,
            SweepError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> &'static str {
    "ok"
}

async fn process_payout(
    State(state): State<ApiState>,
    Path(prize_id): Path<String>,
) -> (StatusCode, Json<PayoutEnvelope>) {
    let result = state.processor.process_payout(&prize_id).await;
    (status_for(&result), Json(PayoutEnvelope::from_result(&result)))
}

async fn run_sweep(State(state): State<ApiState>) -> Result<Json<SweepSummary>, SweepError> {
    Ok(Json(state.sweep.run().await?))
}
