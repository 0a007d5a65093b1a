//! Free-seat queries derived from live claims. Reads compute effective status,
//! so a hold past its deadline frees the seat here before the sweep cancels it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{ClaimError, ClaimResult};
use crate::models::{ClaimStatus, SeatClaim};
use crate::services::claims::load_event;
use crate::store::ClaimStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSeats {
    pub event_id: Uuid,
    pub capacity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub total_available: usize,
    pub seats: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SeatAvailability {
    Available,
    Reserved {
        #[serde(rename = "expiresAt")]
        expires_at: Option<DateTime<Utc>>,
    },
    Active,
}

/// `{1..capacity}` minus seats held by live claims. With a category, only live
/// claims in that category take a seat out; seats nobody claimed stay listed
/// under every category.
pub fn available_seats(
    capacity: i32,
    claims: &[SeatClaim],
    category: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<i32> {
    let taken: HashSet<i32> = claims
        .iter()
        .filter(|claim| claim.occupies_seat(now))
        .filter(|claim| category.map_or(true, |c| claim.category == c))
        .map(|claim| claim.seat_number)
        .collect();

    (1..=capacity).filter(|seat| !taken.contains(seat)).collect()
}

#[derive(Clone)]
pub struct AvailabilityQuery {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
}

impl AvailabilityQuery {
    pub fn new(store: Arc<dyn ClaimStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn get_available_seats(&self, event_id: Uuid, category: Option<&str>) -> ClaimResult<AvailableSeats> {
        let store = self.store.as_ref();
        let event = load_event(store, event_id).await?;
        let claims = store.live_claims_for_event(event_id).await?;
        let seats = available_seats(event.capacity, &claims, category, self.clock.now());

        Ok(AvailableSeats {
            event_id,
            capacity: event.capacity,
            category: category.map(str::to_string),
            total_available: seats.len(),
            seats,
        })
    }

    pub async fn check_seat_availability(&self, event_id: Uuid, seat_number: i32) -> ClaimResult<SeatAvailability> {
        let store = self.store.as_ref();
        let event = load_event(store, event_id).await?;
        // Места вне зала просто не существует
        if !event.has_seat(seat_number) {
            return Err(ClaimError::NotFound("seat"));
        }

        let now = self.clock.now();
        let holder = store.find_live_claim(event_id, seat_number).await?;
        Ok(match holder.map(|claim| (claim.effective_status(now), claim)) {
            Some((ClaimStatus::Reserved, claim)) => SeatAvailability::Reserved {
                expires_at: claim.reservation_expires_at,
            },
            Some((ClaimStatus::Active, _)) => SeatAvailability::Active,
            _ => SeatAvailability::Available,
        })
    }
}
