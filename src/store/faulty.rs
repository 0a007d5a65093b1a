//! Test-only wrapper over [`InMemoryClaimStore`] that injects failures and
//! interleaved writes at chosen points.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{ClaimStore, InMemoryClaimStore, StoreResult};
use crate::error::StoreError;
use crate::models::{AnalyticsDelta, Event, PaymentRecord, PaymentStatus, SeatClaim};

pub struct FaultyStore {
    inner: Arc<InMemoryClaimStore>,
    broken_claim: Mutex<Option<Uuid>>,
    write_before_void: Mutex<Option<SeatClaim>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryClaimStore>) -> Self {
        Self { inner, broken_claim: Mutex::new(None), write_before_void: Mutex::new(None) }
    }

    /// Every `update_claim` for this id fails with a store error.
    pub fn break_claim(&self, claim_id: Uuid) {
        *self.broken_claim.lock().unwrap() = Some(claim_id);
    }

    /// Stores `claim` right before the next payment moves to `cancelled`,
    /// as if another request committed it in between.
    pub fn write_before_void(&self, claim: SeatClaim) {
        *self.write_before_void.lock().unwrap() = Some(claim);
    }
}

#[async_trait]
impl ClaimStore for FaultyStore {
    async fn find_event(&self, event_id: Uuid) -> StoreResult<Option<Event>> {
        self.inner.find_event(event_id).await
    }

    async fn adjust_event_analytics(&self, event_id: Uuid, delta: AnalyticsDelta) -> StoreResult<()> {
        self.inner.adjust_event_analytics(event_id, delta).await
    }

    async fn insert_claim(&self, claim: &SeatClaim) -> StoreResult<()> {
        self.inner.insert_claim(claim).await
    }

    async fn find_claim(&self, claim_id: Uuid) -> StoreResult<Option<SeatClaim>> {
        self.inner.find_claim(claim_id).await
    }

    async fn find_live_claim(&self, event_id: Uuid, seat_number: i32) -> StoreResult<Option<SeatClaim>> {
        self.inner.find_live_claim(event_id, seat_number).await
    }

    async fn live_claims_for_event(&self, event_id: Uuid) -> StoreResult<Vec<SeatClaim>> {
        self.inner.live_claims_for_event(event_id).await
    }

    async fn update_claim(&self, claim: &SeatClaim, expected_version: i64) -> StoreResult<bool> {
        if *self.broken_claim.lock().unwrap() == Some(claim.id) {
            return Err(StoreError::Corrupt(format!("claim {}", claim.id)));
        }
        self.inner.update_claim(claim, expected_version).await
    }

    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<SeatClaim>> {
        self.inner.expired_reservations(now, limit).await
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()> {
        self.inner.insert_payment(payment).await
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        self.inner.find_payment(payment_id).await
    }

    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        refunded_amount: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        if to == PaymentStatus::Cancelled {
            let pending = self.write_before_void.lock().unwrap().take();
            if let Some(claim) = pending {
                if let Some(stored) = self.inner.find_claim(claim.id).await? {
                    self.inner.update_claim(&claim, stored.version).await?;
                }
            }
        }
        self.inner.update_payment_status(payment_id, from, to, refunded_amount, at).await
    }
}
