//! Error taxonomy for the claim lifecycle and its HTTP envelope.
//!
//! Domain code returns [`ClaimError`]; handlers turn it into [`ApiError`], which
//! renders `{success: false, message, errors?}` with the matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::models::claim::IllegalTransition;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another claim already holds this seat in a live status.
    #[error("seat already has a live claim")]
    SeatTaken,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("reservation has expired")]
    Expired,
    #[error("ticket has already been used")]
    AlreadyUsed,
    #[error("validation failed")]
    ValidationFailed(Vec<FieldError>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ClaimError {
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ClaimError::ValidationFailed(vec![FieldError::new(field, message)])
    }
}

impl From<IllegalTransition> for ClaimError {
    fn from(err: IllegalTransition) -> Self {
        ClaimError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for ClaimError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value ({})", e.code));
                    FieldError::new(field.clone(), message)
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ClaimError::ValidationFailed(fields)
    }
}

pub type ClaimResult<T> = Result<T, ClaimError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

/// Error returned from handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    errors: Vec<FieldError>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), errors: Vec::new() }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: "Validation failed".to_string(), errors }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ClaimError> for ApiError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            ClaimError::Forbidden(_) => ApiError::new(StatusCode::FORBIDDEN, err.to_string()),
            ClaimError::InvalidState(_) | ClaimError::Expired | ClaimError::AlreadyUsed => {
                ApiError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            ClaimError::Conflict(_) => ApiError::new(StatusCode::CONFLICT, err.to_string()),
            ClaimError::ValidationFailed(errors) => ApiError::validation(errors),
            ClaimError::Store(e) => {
                tracing::error!("storage failure: {:?}", e);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ClaimError::from(errors).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { success: false, message: self.message, errors: self.errors };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        let cases = [
            (ClaimError::NotFound("event"), StatusCode::NOT_FOUND),
            (ClaimError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (ClaimError::InvalidState("no".into()), StatusCode::BAD_REQUEST),
            (ClaimError::Conflict("taken".into()), StatusCode::CONFLICT),
            (ClaimError::Expired, StatusCode::BAD_REQUEST),
            (ClaimError::AlreadyUsed, StatusCode::BAD_REQUEST),
            (ClaimError::invalid_field("seatNumber", "bad"), StatusCode::BAD_REQUEST),
            (ClaimError::Store(StoreError::Corrupt("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(ClaimError::NotFound("reservation").to_string(), "reservation not found");
    }
}
