use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::controllers::ApiResponse;
use crate::error::ApiResult;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/seatmap/{event_id}", get(get_available_seats))
        .route("/seatmap/{event_id}/seat/{seat_no}", get(check_seat))
}

#[derive(Debug, Deserialize)]
struct SeatmapQuery {
    category: Option<String>,
}

// GET /api/seatmap/{event_id}?category=
async fn get_available_seats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<SeatmapQuery>,
) -> ApiResult<impl IntoResponse> {
    let category = query.category.as_deref().filter(|c| !c.is_empty());

    // Сначала пробуем кеш
    if let Some(cache) = &state.cache {
        if let Some(seats) = cache.get_available_seats(event_id, category).await {
            return Ok(ApiResponse::ok(seats));
        }
    }

    let seats = state.availability.get_available_seats(event_id, category).await?;
    if let Some(cache) = &state.cache {
        cache.save_available_seats(&seats).await;
    }
    Ok(ApiResponse::ok(seats))
}

// GET /api/seatmap/{event_id}/seat/{seat_no}
async fn check_seat(
    State(state): State<Arc<AppState>>,
    Path((event_id, seat_no)): Path<(Uuid, i32)>,
) -> ApiResult<impl IntoResponse> {
    let status = state.availability.check_seat_availability(event_id, seat_no).await?;
    Ok(ApiResponse::ok(status))
}
