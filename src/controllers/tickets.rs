use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::controllers::ApiResponse;
use crate::error::ApiResult;
use crate::middleware::{AuthUser, Role, ValidJson};
use crate::services::{Caller, DirectIssue};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets/issue", post(issue_ticket))
        .route("/tickets/validate", post(validate_ticket))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/{id}/cancel", put(cancel_ticket))
        .route("/tickets/{id}/transfer", put(transfer_ticket))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct IssueTicketRequest {
    event_id: Uuid,
    #[validate(range(min = 1, message = "seat number must be positive"))]
    seat_number: i32,
    /// По умолчанию билет выписывается на самого вызывающего.
    attendee_id: Option<Uuid>,
    #[validate(length(min = 1, max = 50, message = "category must be 1-50 characters"))]
    category: String,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    price: i64,
    #[validate(length(equal = 3, message = "currency must be a 3-letter code"))]
    currency: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CancelTicketRequest {
    #[validate(length(max = 500, message = "reason is too long"))]
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    new_attendee_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ValidateTicketRequest {
    ticket_id: Uuid,
    event_id: Uuid,
}

fn caller(user: &AuthUser, privileged_roles: &[Role]) -> Caller {
    Caller {
        user_id: user.user_id,
        privileged: user.is_admin() || privileged_roles.contains(&user.role),
    }
}

// POST /api/tickets/issue
async fn issue_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidJson(req): ValidJson<IssueTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    let attendee_id = req.attendee_id.unwrap_or(user.user_id);
    if attendee_id != user.user_id {
        // Выписать билет на другого человека может только организатор
        user.require(&[Role::Organizer])?;
    }

    let ticket = state
        .tickets
        .issue_ticket(DirectIssue {
            event_id: req.event_id,
            seat_number: req.seat_number,
            attendee_id,
            category: req.category,
            price: req.price,
            currency: req.currency,
        })
        .await?;
    state.invalidate_seats(ticket.event_id).await;

    Ok((StatusCode::CREATED, ApiResponse::with_message("Ticket issued", ticket)))
}

// GET /api/tickets/{id}
async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let ticket = state.tickets.get_ticket(id, caller(&user, &[Role::Staff])).await?;
    Ok(ApiResponse::ok(ticket))
}

// PUT /api/tickets/{id}/cancel
async fn cancel_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    body: Option<ValidJson<CancelTicketRequest>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.and_then(|ValidJson(req)| req.reason);
    let ticket = state.tickets.cancel_ticket(id, caller(&user, &[]), reason).await?;
    state.invalidate_seats(ticket.event_id).await;
    Ok(ApiResponse::with_message("Ticket cancelled", ticket))
}

// PUT /api/tickets/{id}/transfer
async fn transfer_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    ValidJson(req): ValidJson<TransferRequest>,
) -> ApiResult<impl IntoResponse> {
    let ticket = state
        .tickets
        .transfer_ticket(id, user.user_id, req.new_attendee_id)
        .await?;
    Ok(ApiResponse::with_message("Ticket transferred", ticket))
}

// POST /api/tickets/validate
async fn validate_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ValidJson(req): ValidJson<ValidateTicketRequest>,
) -> ApiResult<impl IntoResponse> {
    user.require(&[Role::Staff])?;

    let ticket = state
        .tickets
        .validate_ticket(req.ticket_id, req.event_id, user.user_id)
        .await?;
    Ok(ApiResponse::with_message("Ticket checked in", ticket))
}
