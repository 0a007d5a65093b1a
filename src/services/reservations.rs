//! reservations.rs
//!
//! Менеджер временных броней мест.
//!
//! - Бронь создается вставкой в хранилище; уникальность живой заявки на место
//!   гарантирует само хранилище, а не проверка "прочитал-записал".
//! - На каждую бронь ставится таймер истечения. Таймер только ускоряет
//!   освобождение места: после рестарта он теряется, и корректность держит
//!   периодическая зачистка (`cleanup_expired_reservations`).
//! - Таймер и зачистка используют один и тот же предикат
//!   `status == reserved && reservation_expires_at <= now`, поэтому их можно
//!   запускать повторно и в любом порядке.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{ReservationConfig, TicketConfig};
use crate::error::{ClaimError, ClaimResult};
use crate::models::{ClaimAction, ClaimStatus, SeatClaim};
use crate::services::claims::{
    ensure_owner, expire_if_due, insert_exclusive, load_claim, load_open_event, mutate_claim,
};
use crate::store::ClaimStore;

#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub default_duration_minutes: i64,
    pub max_duration_minutes: i64,
    pub max_extension_minutes: i64,
    pub timers_enabled: bool,
    pub sweep_batch_size: i64,
    pub currency: String,
}

impl ReservationPolicy {
    pub fn from_config(reservations: &ReservationConfig, tickets: &TicketConfig) -> Self {
        Self {
            default_duration_minutes: reservations.default_duration_minutes,
            max_duration_minutes: reservations.max_duration_minutes,
            max_extension_minutes: reservations.max_extension_minutes,
            timers_enabled: reservations.expiry_timers_enabled,
            sweep_batch_size: reservations.sweep_batch_size,
            currency: tickets.default_currency.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub event_id: Uuid,
    pub seat_number: i32,
    pub attendee_id: Uuid,
    pub duration_minutes: Option<i64>,
}

/// Outcome of one sweep run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled: usize,
    /// Candidates that were confirmed, cancelled or extended before we got to them.
    pub skipped: usize,
    pub failed: usize,
    pub events: BTreeSet<Uuid>,
}

#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    policy: Arc<ReservationPolicy>,
    // event_id каждой брони, снятой таймером
    released: Option<mpsc::UnboundedSender<Uuid>>,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn ClaimStore>, clock: Arc<dyn Clock>, policy: ReservationPolicy) -> Self {
        Self { store, clock, policy: Arc::new(policy), released: None }
    }

    /// Timer expiries happen outside any request, so whoever caches seat
    /// listings learns about them through this channel.
    pub fn with_release_notifier(mut self, released: mpsc::UnboundedSender<Uuid>) -> Self {
        self.released = Some(released);
        self
    }

    pub async fn create_reservation(&self, req: NewReservation) -> ClaimResult<SeatClaim> {
        let minutes = req.duration_minutes.unwrap_or(self.policy.default_duration_minutes);
        if minutes < 1 || minutes > self.policy.max_duration_minutes {
            return Err(ClaimError::invalid_field(
                "durationMinutes",
                format!("duration must be between 1 and {} minutes", self.policy.max_duration_minutes),
            ));
        }

        let store = self.store.as_ref();
        load_open_event(store, req.event_id, req.seat_number).await?;

        let now = self.clock.now();
        let claim = SeatClaim::reserved(
            req.event_id,
            req.seat_number,
            req.attendee_id,
            &self.policy.currency,
            now,
            Duration::minutes(minutes),
        );
        insert_exclusive(store, &claim, now).await?;

        info!(
            reservation_id = %claim.id,
            event_id = %claim.event_id,
            seat = claim.seat_number,
            minutes,
            "Seat reserved"
        );
        if let Some(deadline) = claim.reservation_expires_at {
            self.schedule_expiry(claim.id, claim.event_id, deadline);
        }
        Ok(claim)
    }

    pub async fn get_reservation(&self, reservation_id: Uuid, attendee_id: Uuid) -> ClaimResult<SeatClaim> {
        let claim = load_claim(self.store.as_ref(), reservation_id, "reservation").await?;
        ensure_owner(&claim, attendee_id, "reservation")?;
        Ok(claim)
    }

    /// Pushes the deadline forward. A fresh timer is scheduled for the new
    /// deadline; the old timer re-checks the deadline and does nothing.
    pub async fn extend_reservation(
        &self,
        reservation_id: Uuid,
        attendee_id: Uuid,
        additional_minutes: i64,
    ) -> ClaimResult<SeatClaim> {
        if additional_minutes < 1 || additional_minutes > self.policy.max_extension_minutes {
            return Err(ClaimError::invalid_field(
                "additionalMinutes",
                format!("extension must be between 1 and {} minutes", self.policy.max_extension_minutes),
            ));
        }

        let now = self.clock.now();
        let (claim, deadline) = mutate_claim(self.store.as_ref(), reservation_id, "reservation", now, |claim| {
            ensure_owner(claim, attendee_id, "reservation")?;
            if claim.status != ClaimStatus::Reserved {
                return Err(ClaimError::InvalidState(format!("reservation is {}", claim.status)));
            }
            let expires_at = match claim.reservation_expires_at {
                Some(expires_at) if expires_at > now => expires_at,
                _ => return Err(ClaimError::Expired),
            };
            let deadline = expires_at + Duration::minutes(additional_minutes);
            claim.reservation_expires_at = Some(deadline);
            Ok(deadline)
        })
        .await?;

        info!(%reservation_id, new_expires_at = %deadline, "Reservation extended");
        self.schedule_expiry(reservation_id, claim.event_id, deadline);
        Ok(claim)
    }

    pub async fn cancel_reservation(&self, reservation_id: Uuid, attendee_id: Uuid) -> ClaimResult<SeatClaim> {
        let now = self.clock.now();
        let (claim, _) = mutate_claim(self.store.as_ref(), reservation_id, "reservation", now, |claim| {
            ensure_owner(claim, attendee_id, "reservation")?;
            if claim.status != ClaimStatus::Reserved {
                return Err(ClaimError::InvalidState(format!(
                    "only reserved seats can be released, reservation is {}",
                    claim.status
                )));
            }
            claim.apply(ClaimAction::Cancel, now)?;
            claim.cancellation_reason = Some("cancelled by attendee".to_string());
            Ok(())
        })
        .await?;

        info!(%reservation_id, seat = claim.seat_number, "Reservation cancelled");
        Ok(claim)
    }

    /// Timer path. `Ok(false)` when the hold is no longer due.
    pub async fn expire_reservation(&self, reservation_id: Uuid) -> ClaimResult<bool> {
        expire_if_due(self.store.as_ref(), reservation_id, self.clock.now()).await
    }

    /// Batch sweep over every overdue hold. Failures are logged per claim and
    /// do not stop the sweep; a failed hold is not retried within the same run.
    pub async fn cleanup_expired_reservations(&self) -> ClaimResult<SweepReport> {
        let store = self.store.as_ref();
        let batch_size = self.policy.sweep_batch_size;
        let mut report = SweepReport::default();
        let mut failed = HashSet::new();

        loop {
            let now = self.clock.now();
            let batch = store.expired_reservations(now, batch_size).await?;
            let fetched = batch.len();
            let mut progressed = 0;

            for claim in batch {
                if failed.contains(&claim.id) {
                    continue;
                }
                match expire_if_due(store, claim.id, now).await {
                    Ok(true) => {
                        progressed += 1;
                        report.cancelled += 1;
                        report.events.insert(claim.event_id);
                    }
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        failed.insert(claim.id);
                        report.failed += 1;
                        error!(reservation_id = %claim.id, "Failed to expire reservation: {:?}", e);
                    }
                }
            }

            if (fetched as i64) < batch_size || progressed == 0 {
                break;
            }
        }

        if report.cancelled > 0 || report.failed > 0 {
            info!(
                cancelled = report.cancelled,
                skipped = report.skipped,
                failed = report.failed,
                "Expired reservations swept"
            );
        }
        Ok(report)
    }

    fn schedule_expiry(&self, reservation_id: Uuid, event_id: Uuid, deadline: DateTime<Utc>) {
        if !self.policy.timers_enabled {
            return;
        }
        let delay = (deadline - self.clock.now()).to_std().unwrap_or_default();
        let manager = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match manager.expire_reservation(reservation_id).await {
                Ok(true) => {
                    info!(%reservation_id, "Reservation expired by timer");
                    if let Some(released) = &manager.released {
                        let _ = released.send(event_id);
                    }
                }
                Ok(false) => debug!(%reservation_id, "Expiry timer fired, nothing to do"),
                Err(e) => warn!(%reservation_id, "Expiry timer failed: {:?}", e),
            }
        });
    }
}
