//! Persistence seam for claims, events and payments.
//!
//! Every primitive here must be atomic on its own. Seat exclusivity is the
//! store's job ([`ClaimStore::insert_claim`] rejects a second live claim for a
//! seat); everything else is compare-and-swap on `version` or payment status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AnalyticsDelta, Event, PaymentRecord, PaymentStatus, SeatClaim};

#[cfg(test)]
pub mod faulty;
pub mod memory;
pub mod postgres;

pub use memory::InMemoryClaimStore;
pub use postgres::PgClaimStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ClaimStore: Send + Sync + 'static {
    async fn find_event(&self, event_id: Uuid) -> StoreResult<Option<Event>>;

    /// Atomic increment/decrement of the event counters.
    async fn adjust_event_analytics(&self, event_id: Uuid, delta: AnalyticsDelta) -> StoreResult<()>;

    /// Inserts a new claim. Fails with [`StoreError::SeatTaken`] when the seat
    /// already has a claim in `reserved` or `active`.
    async fn insert_claim(&self, claim: &SeatClaim) -> StoreResult<()>;

    async fn find_claim(&self, claim_id: Uuid) -> StoreResult<Option<SeatClaim>>;

    /// The stored live claim for a seat, if any. Expired holds are included.
    async fn find_live_claim(&self, event_id: Uuid, seat_number: i32) -> StoreResult<Option<SeatClaim>>;

    async fn live_claims_for_event(&self, event_id: Uuid) -> StoreResult<Vec<SeatClaim>>;

    /// Writes `claim` only if the stored version is still `expected_version`.
    /// The stored version becomes `expected_version + 1`.
    async fn update_claim(&self, claim: &SeatClaim, expected_version: i64) -> StoreResult<bool>;

    /// Holds with `reservation_expires_at <= now`, oldest first.
    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<SeatClaim>>;

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()>;

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>>;

    /// Compare-and-swap on payment status.
    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        refunded_amount: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}
