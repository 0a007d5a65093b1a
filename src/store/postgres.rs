use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use super::{ClaimStore, StoreResult};
use crate::database::Database;
use crate::error::StoreError;
use crate::models::{
    AnalyticsDelta, CheckIn, ClaimStatus, Event, EventAnalytics, PaymentRecord, PaymentStatus,
    SeatClaim, TransferRecord,
};

const CLAIM_COLUMNS: &str = "id, event_id, attendee_id, seat_number, category, price, currency, status,
    reserved_at, reservation_expires_at, issued_at, payment_ref, check_in, is_transferred,
    transfer_history, cancelled_at, cancellation_reason, refunded_at, created_at, updated_at, version";

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    status: String,
    starts_at: DateTime<Utc>,
    capacity: i32,
    tickets_sold: i64,
    attendees: i64,
    revenue: i64,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            title: row.title,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            starts_at: row.starts_at,
            capacity: row.capacity,
            analytics: EventAnalytics {
                tickets_sold: row.tickets_sold,
                attendees: row.attendees,
                revenue: row.revenue,
            },
        })
    }
}

#[derive(FromRow)]
struct ClaimRow {
    id: Uuid,
    event_id: Uuid,
    attendee_id: Uuid,
    seat_number: i32,
    category: String,
    price: i64,
    currency: String,
    status: String,
    reserved_at: Option<DateTime<Utc>>,
    reservation_expires_at: Option<DateTime<Utc>>,
    issued_at: Option<DateTime<Utc>>,
    payment_ref: Option<Uuid>,
    check_in: Option<Json<CheckIn>>,
    is_transferred: bool,
    transfer_history: Json<Vec<TransferRecord>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<ClaimRow> for SeatClaim {
    type Error = StoreError;

    fn try_from(row: ClaimRow) -> Result<Self, Self::Error> {
        Ok(SeatClaim {
            id: row.id,
            event_id: row.event_id,
            attendee_id: row.attendee_id,
            seat_number: row.seat_number,
            category: row.category,
            price: row.price,
            currency: row.currency,
            status: row.status.parse::<ClaimStatus>().map_err(StoreError::Corrupt)?,
            reserved_at: row.reserved_at,
            reservation_expires_at: row.reservation_expires_at,
            issued_at: row.issued_at,
            payment_ref: row.payment_ref,
            check_in: row.check_in.map(|Json(c)| c),
            is_transferred: row.is_transferred,
            transfer_history: row.transfer_history.0,
            cancelled_at: row.cancelled_at,
            cancellation_reason: row.cancellation_reason,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    claim_id: Uuid,
    event_id: Uuid,
    attendee_id: Uuid,
    amount: i64,
    currency: String,
    status: String,
    signature: String,
    refunded_amount: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            id: row.id,
            claim_id: row.claim_id,
            event_id: row.event_id,
            attendee_id: row.attendee_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            signature: row.signature,
            refunded_amount: row.refunded_amount,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn claims_from_rows(rows: Vec<ClaimRow>) -> StoreResult<Vec<SeatClaim>> {
    rows.into_iter().map(SeatClaim::try_from).collect()
}

/// Unique violations on `seat_claims_live_seat_idx` are the exclusivity signal.
fn map_write_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::SeatTaken,
        _ => StoreError::Database(err),
    }
}

/// Postgres-backed store. Exclusivity rests on a partial unique index over
/// `(event_id, seat_number) WHERE status IN ('reserved', 'active')`.
#[derive(Clone)]
pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool.clone() }
    }
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    async fn find_event(&self, event_id: Uuid) -> StoreResult<Option<Event>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, title, status, starts_at, capacity, tickets_sold, attendees, revenue
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Event::try_from).transpose()
    }

    async fn adjust_event_analytics(&self, event_id: Uuid, delta: AnalyticsDelta) -> StoreResult<()> {
        // Атомарный инкремент на стороне БД, без read-modify-write
        sqlx::query(
            "UPDATE events
             SET tickets_sold = tickets_sold + $2,
                 attendees = attendees + $3,
                 revenue = revenue + $4
             WHERE id = $1",
        )
        .bind(event_id)
        .bind(delta.tickets_sold)
        .bind(delta.attendees)
        .bind(delta.revenue)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_claim(&self, claim: &SeatClaim) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO seat_claims (
                id, event_id, attendee_id, seat_number, category, price, currency, status,
                reserved_at, reservation_expires_at, issued_at, payment_ref, check_in,
                is_transferred, transfer_history, cancelled_at, cancellation_reason,
                refunded_at, created_at, updated_at, version
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
        )
        .bind(claim.id)
        .bind(claim.event_id)
        .bind(claim.attendee_id)
        .bind(claim.seat_number)
        .bind(&claim.category)
        .bind(claim.price)
        .bind(&claim.currency)
        .bind(claim.status.as_str())
        .bind(claim.reserved_at)
        .bind(claim.reservation_expires_at)
        .bind(claim.issued_at)
        .bind(claim.payment_ref)
        .bind(claim.check_in.as_ref().map(Json))
        .bind(claim.is_transferred)
        .bind(Json(&claim.transfer_history))
        .bind(claim.cancelled_at)
        .bind(&claim.cancellation_reason)
        .bind(claim.refunded_at)
        .bind(claim.created_at)
        .bind(claim.updated_at)
        .bind(claim.version)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    async fn find_claim(&self, claim_id: Uuid) -> StoreResult<Option<SeatClaim>> {
        let row = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM seat_claims WHERE id = $1"
        ))
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SeatClaim::try_from).transpose()
    }

    async fn find_live_claim(&self, event_id: Uuid, seat_number: i32) -> StoreResult<Option<SeatClaim>> {
        let row = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM seat_claims
             WHERE event_id = $1 AND seat_number = $2 AND status IN ('reserved', 'active')"
        ))
        .bind(event_id)
        .bind(seat_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SeatClaim::try_from).transpose()
    }

    async fn live_claims_for_event(&self, event_id: Uuid) -> StoreResult<Vec<SeatClaim>> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM seat_claims
             WHERE event_id = $1 AND status IN ('reserved', 'active')
             ORDER BY seat_number"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        claims_from_rows(rows)
    }

    async fn update_claim(&self, claim: &SeatClaim, expected_version: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE seat_claims SET
                attendee_id = $3, category = $4, price = $5, currency = $6, status = $7,
                reserved_at = $8, reservation_expires_at = $9, issued_at = $10,
                payment_ref = $11, check_in = $12, is_transferred = $13,
                transfer_history = $14, cancelled_at = $15, cancellation_reason = $16,
                refunded_at = $17, updated_at = $18, version = version + 1
             WHERE id = $1 AND version = $2",
        )
        .bind(claim.id)
        .bind(expected_version)
        .bind(claim.attendee_id)
        .bind(&claim.category)
        .bind(claim.price)
        .bind(&claim.currency)
        .bind(claim.status.as_str())
        .bind(claim.reserved_at)
        .bind(claim.reservation_expires_at)
        .bind(claim.issued_at)
        .bind(claim.payment_ref)
        .bind(claim.check_in.as_ref().map(Json))
        .bind(claim.is_transferred)
        .bind(Json(&claim.transfer_history))
        .bind(claim.cancelled_at)
        .bind(&claim.cancellation_reason)
        .bind(claim.refunded_at)
        .bind(claim.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn expired_reservations(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<SeatClaim>> {
        let rows = sqlx::query_as::<_, ClaimRow>(&format!(
            "SELECT {CLAIM_COLUMNS} FROM seat_claims
             WHERE status = 'reserved' AND reservation_expires_at <= $1
             ORDER BY reservation_expires_at
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        claims_from_rows(rows)
    }

    async fn insert_payment(&self, payment: &PaymentRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payments (
                id, claim_id, event_id, attendee_id, amount, currency, status, signature,
                refunded_amount, created_at, updated_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(payment.id)
        .bind(payment.claim_id)
        .bind(payment.event_id)
        .bind(payment.attendee_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.signature)
        .bind(payment.refunded_amount)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_payment(&self, payment_id: Uuid) -> StoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, claim_id, event_id, attendee_id, amount, currency, status, signature,
                    refunded_amount, created_at, updated_at
             FROM payments WHERE id = $1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn update_payment_status(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        refunded_amount: Option<i64>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE payments
             SET status = $3, refunded_amount = COALESCE($4, refunded_amount), updated_at = $5
             WHERE id = $1 AND status = $2",
        )
        .bind(payment_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(refunded_amount)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
