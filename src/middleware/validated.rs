use axum::{
    extract::{rejection::JsonRejection, FromRequest, OptionalFromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::{ApiError, FieldError};

/// `Json<T>` that also runs `validator` rules. Malformed bodies and rule
/// violations both come back as 400 with per-field errors.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = <Json<T> as FromRequest<S>>::from_request(req, state)
            .await
            .map_err(body_error)?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// For endpoints whose body is optional: a request without a `Content-Type`
/// yields `None`, anything else goes through the same checks as above.
impl<S, T> OptionalFromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let body = <Json<T> as OptionalFromRequest<S>>::from_request(req, state)
            .await
            .map_err(body_error)?;
        match body {
            Some(Json(value)) => {
                value.validate()?;
                Ok(Some(ValidJson(value)))
            }
            None => Ok(None),
        }
    }
}

fn body_error(rejection: JsonRejection) -> ApiError {
    ApiError::validation(vec![FieldError::new("body", rejection.body_text())])
}
