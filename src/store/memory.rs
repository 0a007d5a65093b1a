use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ClaimStore, StoreResult};
use crate::error::StoreError;
use crate::models::{AnalyticsDelta, Event, PaymentRecord, PaymentStatus, SeatClaim};

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, Event>,
    claims: HashMap<Uuid, SeatClaim>,
    // (event_id, seat_number) -> live claim id
    live_seats: HashMap<(Uuid, i32), Uuid>,
    payments: HashMap<Uuid, PaymentRecord>,
}

/// Store kept in process memory behind one mutex.
///
/// Same contract as the Postgres store: the seat index plays the role of the
/// partial unique index, versions give compare-and-swap.
#[derive(Default)]
pub struct InMemoryClaimStore {
    inner: Mutex<Inner>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events are owned elsewhere; this is how they get here.
    pub async fn insert_event(&self, event: Event) {
        self.inner.lock().await.events.insert(event.id, event);
    }

    pub async fn set_event_starts_at(&self, event_id: Uuid, starts_at: DateTime<Utc>) {
        if let Some(event) = self.inner.lock().await.events.get_mut(&event_id) {
            event.starts_at = starts_at;
        }
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn find_event(&self, event_id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.inner.lock().await.events.get(&event_id).cloned())
    }

    async fn adjust_event_analytics(&self, event_id: Uuid, delta: AnalyticsDelta) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(event) = inner.events.get_mut(&event_id) {
            event.analytics.tickets_sold += delta.tickets_sold;
            event.analytics.attendees += delta.attendees;
            event.analytics.revenue += delta.revenue;
        }
        Ok(())
    }

    async fn insert_claim(&self, claim: &SeatClaim) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let seat = (claim.event_id, claim.seat_number);
        if claim.status.is_live() {
            if inner.live_seats.contains_key(&seat) {
                return Err(StoreError::SeatTaken);
            }
            inner.live_seats.insert(seat, claim.id);
        }
        inner.claims.insert(claim.id, claim.clone());
        Ok(())
    }

    async fn find_claim(&self, claim_id: Uuid) -> StoreResult<Option<SeatClaim>> {
        Ok(self.inner.lock().await.claims.get(&claim_id).cloned())
    }

    async fn find_live_claim(&self, event_id: Uuid, seat_number: i32) -> StoreResult<Option<SeatClaim>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .live_seats
            .get(&(event_id, seat_number))
            .and_then(|id| inner.claims.get(id))
            .cloned())
    }

    async fn live_claims_for_event(&self, event_id: Uuid) -> StoreResult<Vec<SeatClaim>> {
        let inner = self.inner.lock().await;
        let mut claims: Vec<SeatClaim> = inner
            .claims
            .values()
            .filter(|c| c.event_id == event_id && c.status.is_live())
            .cloned()
            .collect();
        claims.sort_by_key(|c| c.seat_number);
        Ok(claims)
    }

    async fn update_claim(&self, claim: &SeatClaim, expected_version: i64) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner.claims.get(&claim.id) else {
            return Ok(false);
        };
        if stored.version != expected_version {
            return Ok(false);
        }

        let old_seat = (stored.event_id, stored.seat_number);
        let was_live = stored.status.is_live();
        let new_seat = (claim.event_id, claim.seat_number);

        if claim.status.is_live() && (!was_live || old_seat != new_seat) {
            if let Some(holder) = inner.live_seats.get(&new_seat) {
                if *holder != claim.id {
                    return Err(StoreError::SeatTaken);
                }
            }
        }
        if was_live {
            inner.live_seats.remove(&old_seat);
        }
        if claim.status.is_live() {
            inner.live_seats.insert(new_seat, claim.id);
        }

        let mut next = claim.clone();
        next.version = expected_version + 1;
        inner.claims.insert(next.id, next);
        Ok(true)
    }

    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<SeatClaim>> {
        let inner = self.inner.lock().await;
        let mut expired: Vec<SeatClaim> = inner
            .claims
            .values()
            .filter(|c| c.is_expired_hold(now))
            .cloned()
            .collect();
        expired.sort_by_key(|c| c.reservation_expires_at);
        expired.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(expired)
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()> {
        self.inner.lock().await.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        Ok(self.inner.lock().await.payments.get(&payment_id).cloned())
    }

    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        refunded_amount: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.payments.get_mut(&payment_id) {
            Some(payment) if payment.status == from => {
                payment.status = to;
                if refunded_amount.is_some() {
                    payment.refunded_amount = refunded_amount;
                }
                payment.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClaimAction;
    use chrono::Duration;

    fn hold(event_id: Uuid, seat: i32) -> SeatClaim {
        SeatClaim::reserved(event_id, seat, Uuid::new_v4(), "KZT", Utc::now(), Duration::minutes(15))
    }

    #[tokio::test]
    async fn second_live_claim_for_seat_is_rejected() {
        let store = InMemoryClaimStore::new();
        let event_id = Uuid::new_v4();
        store.insert_claim(&hold(event_id, 3)).await.unwrap();
        let err = store.insert_claim(&hold(event_id, 3)).await.unwrap_err();
        assert!(matches!(err, StoreError::SeatTaken));
        // Другое место того же события свободно
        store.insert_claim(&hold(event_id, 4)).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_claim_frees_the_seat() {
        let store = InMemoryClaimStore::new();
        let event_id = Uuid::new_v4();
        let mut claim = hold(event_id, 7);
        store.insert_claim(&claim).await.unwrap();

        claim.apply(ClaimAction::Cancel, Utc::now()).unwrap();
        assert!(store.update_claim(&claim, 0).await.unwrap());
        assert!(store.find_live_claim(event_id, 7).await.unwrap().is_none());
        store.insert_claim(&hold(event_id, 7)).await.unwrap();
    }

    #[tokio::test]
    async fn stale_version_loses_the_swap() {
        let store = InMemoryClaimStore::new();
        let claim = hold(Uuid::new_v4(), 1);
        store.insert_claim(&claim).await.unwrap();

        let mut first = claim.clone();
        first.category = "vip".to_string();
        assert!(store.update_claim(&first, 0).await.unwrap());

        let mut second = claim.clone();
        second.category = "standard".to_string();
        assert!(!store.update_claim(&second, 0).await.unwrap());

        let stored = store.find_claim(claim.id).await.unwrap().unwrap();
        assert_eq!(stored.category, "vip");
        assert_eq!(stored.version, 1);
    }
}
