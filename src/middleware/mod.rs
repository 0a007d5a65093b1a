use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;

mod validated;

pub use validated::ValidJson;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Attendee,
    Organizer,
    Staff,
    Admin,
}

/// Содержимое bearer-токена.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, email: impl Into<String>, role: Role, ttl: Duration) -> Self {
        Self { sub: user_id, email: email.into(), role, exp: (Utc::now() + ttl).timestamp() }
    }
}

pub fn encode_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes()))
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ApiError::unauthorized("Token has expired"),
            ErrorKind::InvalidSignature => ApiError::unauthorized("Token signature is invalid"),
            _ => ApiError::unauthorized("Token is invalid"),
        })
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Пропускает только перечисленные роли; админ проходит всегда.
    pub fn require(&self, roles: &[Role]) -> Result<(), ApiError> {
        if self.is_admin() || roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Insufficient role for this operation"))
        }
    }
}

// Bearer JWT extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Получаем заголовок Authorization
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        // Проверяем что это Bearer
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Expected a Bearer token"))?;

        let claims = decode_token(&state.config.jwt.secret, token.trim())?;

        Ok(AuthUser { user_id: claims.sub, email: claims.email, role: claims.role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn token_round_trips_with_the_same_secret() {
        let user_id = Uuid::new_v4();
        let token = encode_token("secret", &Claims::new(user_id, "a@b.kz", Role::Staff, Duration::hours(1))).unwrap();

        let claims = decode_token("secret", &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Staff);

        let err = decode_token("other", &token).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = Claims::new(Uuid::new_v4(), "a@b.kz", Role::Attendee, Duration::hours(-2));
        let token = encode_token("secret", &claims).unwrap();
        assert_eq!(decode_token("secret", &token).unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn admin_passes_every_role_gate() {
        let user = |role| AuthUser { user_id: Uuid::new_v4(), email: String::new(), role };
        assert!(user(Role::Admin).require(&[Role::Staff]).is_ok());
        assert!(user(Role::Staff).require(&[Role::Staff]).is_ok());
        assert!(user(Role::Attendee).require(&[Role::Staff, Role::Organizer]).is_err());
    }
}
