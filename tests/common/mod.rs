#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use fake::{faker::internet::en::SafeEmail, Fake};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use seat_claims::clock::{Clock, ManualClock};
use seat_claims::config::Config;
use seat_claims::controllers;
use seat_claims::middleware::{encode_token, Claims, Role};
use seat_claims::models::{Event, EventAnalytics, EventStatus};
use seat_claims::store::{ClaimStore, InMemoryClaimStore};
use seat_claims::AppState;

pub struct TestApp {
    pub store: Arc<InMemoryClaimStore>,
    pub clock: Arc<ManualClock>,
    pub state: Arc<AppState>,
    pub router: Router,
    pub event_id: Uuid,
}

pub fn test_config() -> Config {
    let mut config = Config::defaults().expect("default config");
    config.reservations.expiry_timers_enabled = false;
    config.payment.processing_delay_ms = 0;
    config
}

/// App over the in-memory store with one active event.
pub async fn spawn_app(capacity: i32, starts_in: Duration) -> TestApp {
    let store = Arc::new(InMemoryClaimStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id = Uuid::new_v4();
    store
        .insert_event(Event {
            id: event_id,
            title: "Integration night".to_string(),
            status: EventStatus::Active,
            starts_at: clock.now() + starts_in,
            capacity,
            analytics: EventAnalytics::default(),
        })
        .await;

    let state = AppState::from_parts(test_config(), store.clone(), clock.clone(), None, None);
    let router = controllers::app(state.clone());
    TestApp { store, clock, state, router, event_id }
}

impl TestApp {
    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        let email: String = SafeEmail().fake();
        let claims = Claims::new(user_id, email, role, Duration::hours(1));
        encode_token(&self.state.config.jwt.secret, &claims).expect("token")
    }

    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        (status, body_json(resp).await)
    }

    pub async fn analytics(&self) -> EventAnalytics {
        self.store.find_event(self.event_id).await.unwrap().unwrap().analytics
    }
}

pub async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
