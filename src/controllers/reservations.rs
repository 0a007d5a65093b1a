use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::controllers::ApiResponse;
use crate::error::ApiResult;
use crate::middleware::{AuthUser, Role, ValidJson};
use crate::models::ClaimStatus;
use crate::services::{Confirmation, NewReservation};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/cleanup", post(cleanup_expired))
        .route("/reservations/{id}", get(get_reservation).delete(cancel_reservation))
        .route("/reservations/{id}/extend", put(extend_reservation))
        .route("/reservations/{id}/confirm", post(confirm_reservation))
}

/* ---------- DTOs ---------- */

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreateReservationRequest {
    event_id: Uuid,
    #[validate(range(min = 1, message = "seat number must be positive"))]
    seat_number: i32,
    #[validate(range(min = 1, message = "duration must be at least one minute"))]
    duration_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationCreated {
    reservation_id: Uuid,
    event_id: Uuid,
    #[serde(rename = "seatNo")]
    seat_number: i32,
    status: ClaimStatus,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ExtendRequest {
    #[validate(range(min = 1, message = "extension must be at least one minute"))]
    additional_minutes: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationExtended {
    reservation_id: Uuid,
    new_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    #[validate(length(min = 1, max = 50, message = "category must be 1-50 characters"))]
    category: String,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    price: i64,
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    currency: Option<String>,
    /// Уже проведенный платеж; без него списание идет через симулятор.
    payment_ref: Option<Uuid>,
}

/* ---------- handlers ---------- */

// POST /api/reservations
async fn create_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidJson(req): ValidJson<CreateReservationRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require(&[Role::Attendee])?;

    let claim = state
        .reservations
        .create_reservation(NewReservation {
            event_id: req.event_id,
            seat_number: req.seat_number,
            attendee_id: user.user_id,
            duration_minutes: req.duration_minutes,
        })
        .await?;
    state.invalidate_seats(claim.event_id).await;

    let body = ReservationCreated {
        reservation_id: claim.id,
        event_id: claim.event_id,
        seat_number: claim.seat_number,
        status: claim.status,
        expires_at: claim.reservation_expires_at,
    };
    Ok((StatusCode::CREATED, ApiResponse::with_message("Seat reserved", body)))
}

// GET /api/reservations/{id}
async fn get_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let claim = state.reservations.get_reservation(id, user.user_id).await?;
    Ok(ApiResponse::ok(claim))
}

// PUT /api/reservations/{id}/extend
async fn extend_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    ValidJson(req): ValidJson<ExtendRequest>,
) -> ApiResult<impl IntoResponse> {
    let claim = state
        .reservations
        .extend_reservation(id, user.user_id, req.additional_minutes)
        .await?;

    let body = ReservationExtended { reservation_id: claim.id, new_expires_at: claim.reservation_expires_at };
    Ok(ApiResponse::with_message("Reservation extended", body))
}

// DELETE /api/reservations/{id}
async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let claim = state.reservations.cancel_reservation(id, user.user_id).await?;
    state.invalidate_seats(claim.event_id).await;
    Ok(ApiResponse::with_message("Reservation cancelled", claim))
}

// POST /api/reservations/{id}/confirm
async fn confirm_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    ValidJson(req): ValidJson<ConfirmRequest>,
) -> ApiResult<impl IntoResponse> {
    let confirmation = Confirmation {
        reservation_id: id,
        attendee_id: user.user_id,
        category: req.category,
        price: req.price,
        currency: req.currency,
        payment_ref: req.payment_ref,
    };

    let ticket = if confirmation.payment_ref.is_some() {
        state.tickets.confirm_reservation(confirmation).await
    } else {
        state.tickets.confirm_with_payment(confirmation).await.map(|(ticket, _)| ticket)
    };
    // Бронь могла истечь при подтверждении: кеш сбрасываем в любом случае
    let ticket = match ticket {
        Ok(ticket) => ticket,
        Err(e) => {
            if let Ok(claim) = state.reservations.get_reservation(id, user.user_id).await {
                state.invalidate_seats(claim.event_id).await;
            }
            return Err(e.into());
        }
    };
    state.invalidate_seats(ticket.event_id).await;

    Ok(ApiResponse::with_message("Ticket issued", ticket))
}

// POST /api/reservations/cleanup
async fn cleanup_expired(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<impl IntoResponse> {
    user.require(&[])?;

    let report = state.cleanup.run_once().await?;
    Ok(ApiResponse::with_message(
        format!("{} expired reservations cancelled", report.cancelled),
        json!({ "cancelled": report.cancelled, "skipped": report.skipped, "failed": report.failed }),
    ))
}
