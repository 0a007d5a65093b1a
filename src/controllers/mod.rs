pub mod payments;
pub mod reservations;
pub mod seatmap;
pub mod tickets;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

/// Success envelope: `{success: true, message?, data?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, message: None, data: Some(data) })
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self { success: true, message: Some(message.into()), data: Some(data) })
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(reservations::routes())
        .merge(tickets::routes())
        .merge(seatmap::routes())
        .merge(payments::routes())
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> impl IntoResponse {
    let database = match &state.db {
        Some(db) => db.ping().await,
        None => true,
    };
    let cache = match &state.cache {
        Some(cache) => Some(cache.ping().await),
        None => None,
    };
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(json!({ "success": database, "database": database, "cache": cache })))
}

/// Full HTTP surface: liveness routes plus `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Claims API v1.0" }))
        .route("/health", get(health))
        .nest("/api", routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
