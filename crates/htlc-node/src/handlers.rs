//! HTTP API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use htlc_core::{
    ClaimHtlcPaymentRequest, ClaimHtlcPaymentResponse, GetPaymentRequest, GetPaymentResponse,
    HtlcError, ListPaymentsRequest, ListPaymentsResponse, PaymentId, PrepareSendPaymentRequest,
    PrepareSendPaymentResponse, ReceivePaymentRequest, ReceivePaymentResponse,
    SendPaymentRequest, SendPaymentResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

/// `HtlcError` as an HTTP response
pub struct ApiError(pub HtlcError);

impl From<HtlcError> for ApiError {
    fn from(e: HtlcError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            HtlcError::NotFound(_) => StatusCode::NOT_FOUND,
            HtlcError::DuplicateCommitment { .. }
            | HtlcError::AlreadyTerminal { .. }
            | HtlcError::ClaimInProgress(_) => StatusCode::CONFLICT,
            HtlcError::InvalidPreimageLength { .. }
            | HtlcError::InvalidPreimage(_)
            | HtlcError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            HtlcError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            HtlcError::RailSettlementError { .. } | HtlcError::Rail { .. } => {
                StatusCode::BAD_GATEWAY
            }
            HtlcError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("{}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Deserialize)]
pub struct TickRequest {
    pub seconds: i64,
}

#[derive(Serialize, Deserialize)]
pub struct TickResponse {
    pub now: u64,
    pub refunded: Vec<PaymentId>,
}

pub async fn prepare_send(
    State(state): State<AppState>,
    Json(req): Json<PrepareSendPaymentRequest>,
) -> ApiResult<PrepareSendPaymentResponse> {
    Ok(Json(state.service().prepare_send_payment(req).await?))
}

pub async fn send_payment(
    State(state): State<AppState>,
    Json(req): Json<SendPaymentRequest>,
) -> ApiResult<SendPaymentResponse> {
    Ok(Json(state.service().send_payment(req).await?))
}

pub async fn receive_payment(
    State(state): State<AppState>,
    Json(req): Json<ReceivePaymentRequest>,
) -> ApiResult<ReceivePaymentResponse> {
    Ok(Json(state.service().receive_payment(req).await?))
}

pub async fn claim_payment(
    State(state): State<AppState>,
    Json(req): Json<ClaimHtlcPaymentRequest>,
) -> ApiResult<ClaimHtlcPaymentResponse> {
    Ok(Json(state.service().claim_htlc_payment(req).await?))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Json(req): Json<ListPaymentsRequest>,
) -> Json<ListPaymentsResponse> {
    Json(state.service().list_payments(&req))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<GetPaymentResponse> {
    let request = GetPaymentRequest {
        payment_id: PaymentId(id),
    };
    Ok(Json(state.service().get_payment(&request)?))
}

pub async fn tick(
    State(state): State<AppState>,
    Json(req): Json<TickRequest>,
) -> ApiResult<TickResponse> {
    let refunded = state.advance_time(req.seconds)?;
    Ok(Json(TickResponse {
        now: state.now_secs(),
        refunded: refunded.into_iter().map(|p| p.id).collect(),
    }))
}

pub async fn health() -> &'static str {
    "ok"
}
