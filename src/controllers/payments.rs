use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::controllers::ApiResponse;
use crate::error::ApiResult;
use crate::middleware::{AuthUser, ValidJson};
use crate::models::{PaymentRecord, SeatClaim};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/{id}/refund", post(refund_payment))
        .route("/payments/{id}/cancel", post(cancel_payment))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RefundRequest {
    /// Частичный возврат; по умолчанию вся сумма платежа.
    #[validate(range(min = 1, message = "refund amount must be positive"))]
    amount: Option<i64>,
}

#[derive(Debug, Serialize)]
struct RefundResponse {
    ticket: SeatClaim,
    payment: PaymentRecord,
}

// POST /api/payments/{id}/refund
async fn refund_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<ValidJson<RefundRequest>>,
) -> ApiResult<impl IntoResponse> {
    user.require(&[])?;

    let amount = body.and_then(|ValidJson(req)| req.amount);
    let outcome = state.tickets.process_refund(id, amount).await?;
    state.invalidate_seats(outcome.ticket.event_id).await;

    let body = RefundResponse { ticket: outcome.ticket, payment: outcome.payment };
    Ok(ApiResponse::with_message("Refund processed", body))
}

// POST /api/payments/{id}/cancel
async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    user.require(&[])?;

    let payment = state.tickets.cancel_payment(id).await?;
    state.invalidate_seats(payment.event_id).await;
    Ok(ApiResponse::with_message("Payment cancelled", payment))
}
