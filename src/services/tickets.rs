//! tickets.rs
//!
//! Выпуск и жизненный цикл билетов.
//!
//! Билет - это та же заявка на место, что и бронь, только в статусе `active`.
//! Подтверждение брони переводит ее в `active`, прямой выпуск сразу создает
//! `active`-заявку с той же гарантией уникальности места. Счетчики события
//! меняются только атомарными инкрементами хранилища.

use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::TicketConfig;
use crate::error::{ClaimError, ClaimResult};
use crate::models::{
    AnalyticsDelta, CheckIn, ClaimAction, ClaimStatus, PaymentRecord, PaymentStatus, SeatClaim,
    TransferRecord,
};
use crate::services::claims::{
    ensure_owner, expire_if_due, insert_exclusive, load_claim, load_event, load_open_event,
    mutate_claim,
};
use crate::services::payment::PaymentSimulator;
use crate::store::ClaimStore;

#[derive(Debug, Clone)]
pub struct TicketPolicy {
    pub cancel_blackout: Duration,
    pub transfer_blackout: Duration,
    pub currency: String,
}

impl TicketPolicy {
    pub fn from_config(config: &TicketConfig) -> Self {
        Self {
            cancel_blackout: Duration::hours(config.cancel_blackout_hours),
            transfer_blackout: Duration::hours(config.transfer_blackout_hours),
            currency: config.default_currency.clone(),
        }
    }
}

/// Who is asking. Privileged callers (admins) may act on tickets they do not own.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: Uuid,
    pub privileged: bool,
}

#[derive(Debug, Clone)]
pub struct Confirmation {
    pub reservation_id: Uuid,
    pub attendee_id: Uuid,
    pub category: String,
    pub price: i64,
    pub currency: Option<String>,
    pub payment_ref: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct DirectIssue {
    pub event_id: Uuid,
    pub seat_number: i32,
    pub attendee_id: Uuid,
    pub category: String,
    pub price: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub ticket: SeatClaim,
    pub payment: PaymentRecord,
}

#[derive(Clone)]
pub struct TicketIssuance {
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    policy: Arc<TicketPolicy>,
    payments: PaymentSimulator,
}

impl TicketIssuance {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        policy: TicketPolicy,
        payments: PaymentSimulator,
    ) -> Self {
        Self { store, clock, policy: Arc::new(policy), payments }
    }

    fn currency_or_default(&self, currency: Option<String>) -> String {
        currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.policy.currency.clone())
    }

    /// Promotes a live hold to an active ticket. The caller vouches that payment
    /// went through; a `payment_ref`, when given, must point at a completed
    /// payment for this claim that covers the price.
    pub async fn confirm_reservation(&self, req: Confirmation) -> ClaimResult<SeatClaim> {
        if req.price < 0 {
            return Err(ClaimError::invalid_field("price", "price cannot be negative"));
        }
        if let Some(payment_id) = req.payment_ref {
            self.check_payment_covers(payment_id, req.reservation_id, req.price).await?;
        }

        let currency = self.currency_or_default(req.currency.clone());
        let now = self.clock.now();
        let (ticket, confirmed) =
            mutate_claim(self.store.as_ref(), req.reservation_id, "reservation", now, |claim| {
                ensure_owner(claim, req.attendee_id, "reservation")?;
                if claim.status != ClaimStatus::Reserved {
                    return Err(ClaimError::InvalidState(format!("reservation is {}", claim.status)));
                }
                if claim.is_expired_hold(now) {
                    claim.apply(ClaimAction::Expire, now)?;
                    return Ok(false);
                }
                claim.category = req.category.clone();
                claim.price = req.price;
                claim.currency = currency.clone();
                claim.payment_ref = req.payment_ref;
                claim.apply(ClaimAction::Confirm, now)?;
                Ok(true)
            })
            .await?;

        if !confirmed {
            info!(reservation_id = %req.reservation_id, "Confirmation arrived after the hold expired");
            return Err(ClaimError::Expired);
        }

        self.store
            .adjust_event_analytics(ticket.event_id, AnalyticsDelta::ticket_sold(ticket.price))
            .await?;
        info!(ticket_id = %ticket.id, seat = ticket.seat_number, category = %ticket.category, "Ticket issued from reservation");
        Ok(ticket)
    }

    /// Runs the simulated charge, then confirms. If confirmation fails after
    /// the charge, the payment is voided.
    pub async fn confirm_with_payment(&self, req: Confirmation) -> ClaimResult<(SeatClaim, PaymentRecord)> {
        if req.price < 0 {
            return Err(ClaimError::invalid_field("price", "price cannot be negative"));
        }
        let store = self.store.as_ref();
        let now = self.clock.now();
        let claim = load_claim(store, req.reservation_id, "reservation").await?;
        ensure_owner(&claim, req.attendee_id, "reservation")?;
        if claim.status != ClaimStatus::Reserved {
            return Err(ClaimError::InvalidState(format!("reservation is {}", claim.status)));
        }
        // Не списываем деньги за бронь, которая уже истекла
        if claim.is_expired_hold(now) {
            expire_if_due(store, claim.id, now).await?;
            return Err(ClaimError::Expired);
        }

        let currency = self.currency_or_default(req.currency.clone());
        let payment = self.payments.charge(&claim, req.price, &currency).await?;

        let confirmation = Confirmation { payment_ref: Some(payment.id), ..req };
        match self.confirm_reservation(confirmation).await {
            Ok(ticket) => Ok((ticket, payment)),
            Err(e) => {
                if let Err(void_err) = self.payments.void(payment.id).await {
                    error!(payment_id = %payment.id, "Failed to void payment after rejected confirmation: {:?}", void_err);
                }
                Err(e)
            }
        }
    }

    async fn check_payment_covers(&self, payment_id: Uuid, claim_id: Uuid, price: i64) -> ClaimResult<()> {
        let payment = self
            .store
            .find_payment(payment_id)
            .await?
            .ok_or(ClaimError::NotFound("payment"))?;
        if payment.claim_id != claim_id {
            return Err(ClaimError::invalid_field("paymentRef", "payment belongs to another reservation"));
        }
        if payment.status != PaymentStatus::Completed {
            return Err(ClaimError::InvalidState(format!("payment is {}", payment.status)));
        }
        if !self.payments.verify(&payment) {
            return Err(ClaimError::InvalidState("payment signature does not match".to_string()));
        }
        if payment.amount < price {
            return Err(ClaimError::invalid_field("paymentRef", "payment does not cover the ticket price"));
        }
        Ok(())
    }

    /// Direct issue without a hold (organizer/admin path).
    pub async fn issue_ticket(&self, req: DirectIssue) -> ClaimResult<SeatClaim> {
        if req.price < 0 {
            return Err(ClaimError::invalid_field("price", "price cannot be negative"));
        }
        let store = self.store.as_ref();
        load_open_event(store, req.event_id, req.seat_number).await?;

        let now = self.clock.now();
        let currency = self.currency_or_default(req.currency);
        let ticket = SeatClaim::issued(
            req.event_id,
            req.seat_number,
            req.attendee_id,
            &req.category,
            req.price,
            &currency,
            now,
        );
        insert_exclusive(store, &ticket, now).await?;
        store
            .adjust_event_analytics(ticket.event_id, AnalyticsDelta::ticket_sold(ticket.price))
            .await?;

        info!(ticket_id = %ticket.id, event_id = %ticket.event_id, seat = ticket.seat_number, "Ticket issued directly");
        Ok(ticket)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid, caller: Caller) -> ClaimResult<SeatClaim> {
        let ticket = load_claim(self.store.as_ref(), ticket_id, "ticket").await?;
        if !caller.privileged {
            ensure_owner(&ticket, caller.user_id, "ticket")?;
        }
        Ok(ticket)
    }

    /// Allowed while the ticket is active and more than the cancel blackout
    /// remains before the event starts.
    pub async fn cancel_ticket(&self, ticket_id: Uuid, caller: Caller, reason: Option<String>) -> ClaimResult<SeatClaim> {
        let store = self.store.as_ref();
        let ticket = load_claim(store, ticket_id, "ticket").await?;
        let event = load_event(store, ticket.event_id).await?;
        let now = self.clock.now();
        let blackout = self.policy.cancel_blackout;

        let (ticket, _) = mutate_claim(store, ticket_id, "ticket", now, |claim| {
            if !caller.privileged {
                ensure_owner(claim, caller.user_id, "ticket")?;
            }
            if claim.status != ClaimStatus::Active {
                return Err(ClaimError::InvalidState(format!("ticket is {}", claim.status)));
            }
            if event.starts_at - now <= blackout {
                return Err(ClaimError::InvalidState(format!(
                    "tickets cannot be cancelled within {} hours of the event",
                    blackout.num_hours()
                )));
            }
            claim.apply(ClaimAction::Cancel, now)?;
            claim.cancellation_reason = Some(
                reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "cancelled on request".to_string()),
            );
            Ok(())
        })
        .await?;

        store
            .adjust_event_analytics(ticket.event_id, AnalyticsDelta::ticket_cancelled())
            .await?;
        info!(%ticket_id, seat = ticket.seat_number, "Ticket cancelled");
        Ok(ticket)
    }

    /// Hands the ticket to another attendee in one write; the old owner loses
    /// it in the same swap that gives it to the new one.
    pub async fn transfer_ticket(&self, ticket_id: Uuid, owner_id: Uuid, new_attendee_id: Uuid) -> ClaimResult<SeatClaim> {
        let store = self.store.as_ref();
        let ticket = load_claim(store, ticket_id, "ticket").await?;
        let event = load_event(store, ticket.event_id).await?;
        let now = self.clock.now();
        let blackout = self.policy.transfer_blackout;

        let (ticket, _) = mutate_claim(store, ticket_id, "ticket", now, |claim| {
            ensure_owner(claim, owner_id, "ticket")?;
            if claim.status != ClaimStatus::Active {
                return Err(ClaimError::InvalidState(format!("ticket is {}", claim.status)));
            }
            if new_attendee_id == claim.attendee_id {
                return Err(ClaimError::invalid_field("newAttendeeId", "ticket already belongs to this attendee"));
            }
            if event.starts_at - now <= blackout {
                return Err(ClaimError::InvalidState(format!(
                    "tickets cannot be transferred within {} hours of the event",
                    blackout.num_hours()
                )));
            }
            claim.transfer_history.push(TransferRecord {
                from_attendee_id: claim.attendee_id,
                to_attendee_id: new_attendee_id,
                transferred_at: now,
            });
            claim.attendee_id = new_attendee_id;
            claim.is_transferred = true;
            Ok(())
        })
        .await?;

        info!(%ticket_id, to = %new_attendee_id, "Ticket transferred");
        Ok(ticket)
    }

    /// Check-in at the door. One-way: a replay fails with `AlreadyUsed`.
    pub async fn validate_ticket(&self, ticket_id: Uuid, event_id: Uuid, staff_id: Uuid) -> ClaimResult<SeatClaim> {
        let now = self.clock.now();
        let (ticket, _) = mutate_claim(self.store.as_ref(), ticket_id, "ticket", now, |claim| {
            if claim.event_id != event_id {
                return Err(ClaimError::NotFound("ticket for this event"));
            }
            if claim.status == ClaimStatus::Used || claim.is_checked_in() {
                return Err(ClaimError::AlreadyUsed);
            }
            if claim.status != ClaimStatus::Active {
                return Err(ClaimError::InvalidState(format!("ticket is {}", claim.status)));
            }
            claim.check_in = Some(CheckIn { checked_in: true, checked_in_at: now, checked_in_by: staff_id });
            claim.apply(ClaimAction::CheckIn, now)?;
            Ok(())
        })
        .await?;

        info!(%ticket_id, %staff_id, "Ticket checked in");
        Ok(ticket)
    }

    /// Refund reported for a payment. The ticket moves to `refunded` first,
    /// so a payment can only be refunded once.
    pub async fn process_refund(&self, payment_id: Uuid, amount: Option<i64>) -> ClaimResult<RefundOutcome> {
        let store = self.store.as_ref();
        let payment = store
            .find_payment(payment_id)
            .await?
            .ok_or(ClaimError::NotFound("payment"))?;
        if payment.status != PaymentStatus::Completed {
            return Err(ClaimError::InvalidState(format!("payment is {}", payment.status)));
        }
        let amount = amount.unwrap_or(payment.amount);
        if amount <= 0 || amount > payment.amount {
            return Err(ClaimError::invalid_field(
                "amount",
                format!("refund must be between 1 and {}", payment.amount),
            ));
        }

        let now = self.clock.now();
        let (ticket, was_active) = mutate_claim(store, payment.claim_id, "ticket", now, |claim| {
            if claim.payment_ref != Some(payment.id) {
                return Err(ClaimError::InvalidState("payment is not linked to an issued ticket".to_string()));
            }
            let was_active = claim.status == ClaimStatus::Active;
            claim.apply(ClaimAction::Refund, now)?;
            Ok(was_active)
        })
        .await?;

        let updated = store
            .update_payment_status(payment.id, PaymentStatus::Completed, PaymentStatus::Refunded, Some(amount), now)
            .await?;
        if !updated {
            error!(%payment_id, "Ticket refunded but payment status had already changed");
        }

        let mut delta = AnalyticsDelta::refund(amount);
        if was_active {
            delta = delta.and(AnalyticsDelta::ticket_cancelled());
        }
        store.adjust_event_analytics(ticket.event_id, delta).await?;

        let payment = store
            .find_payment(payment_id)
            .await?
            .ok_or(ClaimError::NotFound("payment"))?;
        info!(%payment_id, ticket_id = %ticket.id, amount, "Refund processed");
        Ok(RefundOutcome { ticket, payment })
    }

    /// Cancels a completed payment. A hold still waiting on that payment is
    /// released; a ticket already issued against it has to be refunded instead.
    pub async fn cancel_payment(&self, payment_id: Uuid) -> ClaimResult<PaymentRecord> {
        let store = self.store.as_ref();
        let payment = store
            .find_payment(payment_id)
            .await?
            .ok_or(ClaimError::NotFound("payment"))?;
        if payment.status != PaymentStatus::Completed {
            return Err(ClaimError::InvalidState(format!("payment is {}", payment.status)));
        }

        let claim = load_claim(store, payment.claim_id, "reservation").await?;
        if claim.payment_ref == Some(payment.id)
            && matches!(claim.status, ClaimStatus::Active | ClaimStatus::Used)
        {
            return Err(ClaimError::InvalidState(
                "a ticket was issued against this payment, refund it instead".to_string(),
            ));
        }

        if !self.payments.void(payment.id).await? {
            return Err(ClaimError::Conflict("payment changed while cancelling".to_string()));
        }

        // Подтверждение могло успеть между проверкой и void
        let now = self.clock.now();
        let released = mutate_claim(store, claim.id, "reservation", now, |claim| {
            if claim.payment_ref == Some(payment_id)
                && matches!(claim.status, ClaimStatus::Active | ClaimStatus::Used)
            {
                return Err(ClaimError::Conflict(
                    "a ticket was issued against this payment while cancelling".to_string(),
                ));
            }
            if claim.status != ClaimStatus::Reserved {
                return Ok(false);
            }
            claim.apply(ClaimAction::Cancel, now)?;
            claim.cancellation_reason = Some("payment cancelled".to_string());
            Ok(true)
        })
        .await;

        match released {
            Ok((_, true)) => {
                info!(%payment_id, reservation_id = %claim.id, "Hold released after payment cancellation")
            }
            Ok((_, false)) => {}
            Err(e) => {
                if !self.payments.restore(payment_id).await? {
                    error!(%payment_id, "Payment stays voided after a failed cancellation");
                }
                return Err(e);
            }
        }

        store
            .find_payment(payment_id)
            .await?
            .ok_or(ClaimError::NotFound("payment"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PaymentConfig;
    use crate::models::{Event, EventAnalytics, EventStatus};
    use crate::services::reservations::{NewReservation, ReservationManager, ReservationPolicy};
    use crate::store::faulty::FaultyStore;
    use crate::store::InMemoryClaimStore;
    use chrono::Utc;

    struct Fixture {
        store: Arc<InMemoryClaimStore>,
        clock: Arc<ManualClock>,
        reservations: ReservationManager,
        tickets: TicketIssuance,
        event_id: Uuid,
    }

    async fn fixture(starts_in: Duration) -> Fixture {
        let store = Arc::new(InMemoryClaimStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let event_id = Uuid::new_v4();
        store
            .insert_event(Event {
                id: event_id,
                title: "Stadium show".to_string(),
                status: EventStatus::Active,
                starts_at: clock.now() + starts_in,
                capacity: 100,
                analytics: EventAnalytics::default(),
            })
            .await;

        let reservations = ReservationManager::new(
            store.clone(),
            clock.clone(),
            ReservationPolicy {
                default_duration_minutes: 15,
                max_duration_minutes: 60,
                max_extension_minutes: 30,
                timers_enabled: false,
                sweep_batch_size: 100,
                currency: "KZT".to_string(),
            },
        );
        let payments = PaymentSimulator::from_config(
            &PaymentConfig { processing_delay_ms: 0, signing_secret: "test".to_string() },
            store.clone(),
            clock.clone(),
        );
        let tickets = TicketIssuance::new(
            store.clone(),
            clock.clone(),
            TicketPolicy {
                cancel_blackout: Duration::hours(24),
                transfer_blackout: Duration::hours(48),
                currency: "KZT".to_string(),
            },
            payments,
        );
        Fixture { store, clock, reservations, tickets, event_id }
    }

    async fn reserve(f: &Fixture, seat: i32, attendee: Uuid, minutes: i64) -> SeatClaim {
        f.reservations
            .create_reservation(NewReservation {
                event_id: f.event_id,
                seat_number: seat,
                attendee_id: attendee,
                duration_minutes: Some(minutes),
            })
            .await
            .unwrap()
    }

    fn confirmation(id: Uuid, attendee: Uuid) -> Confirmation {
        Confirmation {
            reservation_id: id,
            attendee_id: attendee,
            category: "vip".to_string(),
            price: 500,
            currency: None,
            payment_ref: None,
        }
    }

    fn direct(f: &Fixture, seat: i32, attendee: Uuid) -> DirectIssue {
        DirectIssue {
            event_id: f.event_id,
            seat_number: seat,
            attendee_id: attendee,
            category: "standard".to_string(),
            price: 200,
            currency: None,
        }
    }

    fn owner(user_id: Uuid) -> Caller {
        Caller { user_id, privileged: false }
    }

    async fn analytics(f: &Fixture) -> EventAnalytics {
        f.store.find_event(f.event_id).await.unwrap().unwrap().analytics
    }

    #[tokio::test]
    async fn reserve_confirm_then_cancel_moves_counters_both_ways() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 5, attendee, 15).await;

        let ticket = f.tickets.confirm_reservation(confirmation(hold.id, attendee)).await.unwrap();
        assert_eq!(ticket.status, ClaimStatus::Active);
        assert_eq!(ticket.category, "vip");
        assert_eq!(ticket.price, 500);
        assert_eq!(ticket.issued_at, Some(f.clock.now()));
        assert_eq!(analytics(&f).await.tickets_sold, 1);
        assert_eq!(analytics(&f).await.attendees, 1);
        assert_eq!(analytics(&f).await.revenue, 500);

        let cancelled = f
            .tickets
            .cancel_ticket(ticket.id, owner(attendee), Some("can't make it".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, ClaimStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("can't make it"));
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(analytics(&f).await.tickets_sold, 0);
        assert_eq!(analytics(&f).await.attendees, 0);
    }

    #[tokio::test]
    async fn confirm_after_deadline_expires_the_hold() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 5, attendee, 1).await;
        f.clock.advance(Duration::minutes(1));

        let err = f.tickets.confirm_reservation(confirmation(hold.id, attendee)).await.unwrap_err();
        assert!(matches!(err, ClaimError::Expired));
        let stored = f.store.find_claim(hold.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Cancelled);
        assert_eq!(analytics(&f).await.tickets_sold, 0);
    }

    #[tokio::test]
    async fn confirm_succeeds_inside_the_extended_window() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 5, attendee, 1).await;
        f.reservations.extend_reservation(hold.id, attendee, 5).await.unwrap();

        f.clock.advance(Duration::minutes(3));
        assert!(!f.reservations.expire_reservation(hold.id).await.unwrap());
        let ticket = f.tickets.confirm_reservation(confirmation(hold.id, attendee)).await.unwrap();
        assert_eq!(ticket.status, ClaimStatus::Active);
    }

    #[tokio::test]
    async fn only_the_owner_confirms() {
        let f = fixture(Duration::days(3)).await;
        let hold = reserve(&f, 5, Uuid::new_v4(), 15).await;
        let err = f.tickets.confirm_reservation(confirmation(hold.id, Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ClaimError::Forbidden(_)));
    }

    #[tokio::test]
    async fn cancel_blackout_boundary() {
        let f = fixture(Duration::hours(23)).await;
        let attendee = Uuid::new_v4();
        let ticket = f.tickets.issue_ticket(direct(&f, 1, attendee)).await.unwrap();
        let err = f.tickets.cancel_ticket(ticket.id, owner(attendee), None).await.unwrap_err();
        assert!(matches!(err, ClaimError::InvalidState(_)));

        f.store.set_event_starts_at(f.event_id, f.clock.now() + Duration::hours(25)).await;
        let cancelled = f.tickets.cancel_ticket(ticket.id, owner(attendee), None).await.unwrap();
        assert_eq!(cancelled.status, ClaimStatus::Cancelled);
    }

    #[tokio::test]
    async fn admins_cancel_other_peoples_tickets() {
        let f = fixture(Duration::days(3)).await;
        let ticket = f.tickets.issue_ticket(direct(&f, 1, Uuid::new_v4())).await.unwrap();

        let err = f.tickets.cancel_ticket(ticket.id, owner(Uuid::new_v4()), None).await.unwrap_err();
        assert!(matches!(err, ClaimError::Forbidden(_)));

        let admin = Caller { user_id: Uuid::new_v4(), privileged: true };
        assert!(f.tickets.cancel_ticket(ticket.id, admin, None).await.is_ok());
    }

    #[tokio::test]
    async fn direct_issue_respects_seat_exclusivity() {
        let f = fixture(Duration::days(3)).await;
        reserve(&f, 8, Uuid::new_v4(), 15).await;
        let err = f.tickets.issue_ticket(direct(&f, 8, Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ClaimError::Conflict(_)));

        let ticket = f.tickets.issue_ticket(direct(&f, 9, Uuid::new_v4())).await.unwrap();
        assert_eq!(ticket.status, ClaimStatus::Active);
        assert!(ticket.reservation_expires_at.is_none());
        assert_eq!(analytics(&f).await.tickets_sold, 1);
    }

    #[tokio::test]
    async fn transfer_moves_ownership_and_records_history() {
        let f = fixture(Duration::days(3)).await;
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let ticket = f.tickets.issue_ticket(direct(&f, 3, alice)).await.unwrap();

        let moved = f.tickets.transfer_ticket(ticket.id, alice, bob).await.unwrap();
        assert_eq!(moved.attendee_id, bob);
        assert!(moved.is_transferred);
        assert_eq!(moved.transfer_history.len(), 1);
        assert_eq!(moved.transfer_history[0].from_attendee_id, alice);
        assert_eq!(moved.status, ClaimStatus::Active);

        // Старый владелец больше ничего не может
        let err = f.tickets.transfer_ticket(ticket.id, alice, alice).await.unwrap_err();
        assert!(matches!(err, ClaimError::Forbidden(_)));
    }

    #[tokio::test]
    async fn transfer_blackout_is_48_hours() {
        let f = fixture(Duration::hours(47)).await;
        let alice = Uuid::new_v4();
        let ticket = f.tickets.issue_ticket(direct(&f, 3, alice)).await.unwrap();
        let err = f.tickets.transfer_ticket(ticket.id, alice, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ClaimError::InvalidState(_)));
    }

    #[tokio::test]
    async fn check_in_is_one_way() {
        let f = fixture(Duration::days(3)).await;
        let staff = Uuid::new_v4();
        let ticket = f.tickets.issue_ticket(direct(&f, 4, Uuid::new_v4())).await.unwrap();

        let used = f.tickets.validate_ticket(ticket.id, f.event_id, staff).await.unwrap();
        assert_eq!(used.status, ClaimStatus::Used);
        let check_in = used.check_in.unwrap();
        assert!(check_in.checked_in);
        assert_eq!(check_in.checked_in_by, staff);

        let err = f.tickets.validate_ticket(ticket.id, f.event_id, staff).await.unwrap_err();
        assert!(matches!(err, ClaimError::AlreadyUsed));
        let stored = f.store.find_claim(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Used);
    }

    #[tokio::test]
    async fn check_in_rejects_wrong_event_and_holds() {
        let f = fixture(Duration::days(3)).await;
        let ticket = f.tickets.issue_ticket(direct(&f, 4, Uuid::new_v4())).await.unwrap();
        let err = f.tickets.validate_ticket(ticket.id, Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ClaimError::NotFound(_)));

        let hold = reserve(&f, 6, Uuid::new_v4(), 15).await;
        let err = f.tickets.validate_ticket(hold.id, f.event_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ClaimError::InvalidState(_)));
    }

    #[tokio::test]
    async fn charged_confirmation_links_payment_and_refund_reverses_it() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 10, attendee, 15).await;

        let (ticket, payment) = f.tickets.confirm_with_payment(confirmation(hold.id, attendee)).await.unwrap();
        assert_eq!(ticket.payment_ref, Some(payment.id));
        assert_eq!(payment.amount, 500);
        assert_eq!(analytics(&f).await.revenue, 500);

        let outcome = f.tickets.process_refund(payment.id, None).await.unwrap();
        assert_eq!(outcome.ticket.status, ClaimStatus::Refunded);
        assert_eq!(outcome.payment.status, PaymentStatus::Refunded);
        assert_eq!(outcome.payment.refunded_amount, Some(500));

        let totals = analytics(&f).await;
        assert_eq!(totals.revenue, 0);
        assert_eq!(totals.tickets_sold, 0);
        assert_eq!(totals.attendees, 0);

        let err = f.tickets.process_refund(payment.id, None).await.unwrap_err();
        assert!(matches!(err, ClaimError::InvalidState(_)));
    }

    #[tokio::test]
    async fn refund_of_cancelled_ticket_only_touches_revenue() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 11, attendee, 15).await;
        let (ticket, payment) = f.tickets.confirm_with_payment(confirmation(hold.id, attendee)).await.unwrap();
        f.tickets.cancel_ticket(ticket.id, owner(attendee), None).await.unwrap();

        let err = f.tickets.process_refund(payment.id, Some(501)).await.unwrap_err();
        assert!(matches!(err, ClaimError::ValidationFailed(_)));

        f.tickets.process_refund(payment.id, Some(200)).await.unwrap();
        let totals = analytics(&f).await;
        assert_eq!(totals.tickets_sold, 0);
        assert_eq!(totals.revenue, 300);
    }

    #[tokio::test]
    async fn payment_ref_must_belong_to_the_reservation() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let first = reserve(&f, 12, attendee, 15).await;
        let second = reserve(&f, 13, attendee, 15).await;
        let (_, payment) = f.tickets.confirm_with_payment(confirmation(first.id, attendee)).await.unwrap();

        let mut req = confirmation(second.id, attendee);
        req.payment_ref = Some(payment.id);
        let err = f.tickets.confirm_reservation(req).await.unwrap_err();
        assert!(matches!(err, ClaimError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn cancelling_a_payment_releases_the_waiting_hold() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 14, attendee, 15).await;
        let charged = f.tickets.payments.charge(&hold, 500, "KZT").await.unwrap();

        let payment = f.tickets.cancel_payment(charged.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        let stored = f.store.find_claim(hold.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Cancelled);

        // Оплаченный билет отменить через платеж нельзя
        let hold = reserve(&f, 15, attendee, 15).await;
        let (_, paid) = f.tickets.confirm_with_payment(confirmation(hold.id, attendee)).await.unwrap();
        let err = f.tickets.cancel_payment(paid.id).await.unwrap_err();
        assert!(matches!(err, ClaimError::InvalidState(_)));
    }

    #[tokio::test]
    async fn payment_cancel_backs_off_when_a_confirm_lands_first() {
        let f = fixture(Duration::days(3)).await;
        let attendee = Uuid::new_v4();
        let hold = reserve(&f, 16, attendee, 15).await;
        let charged = f.tickets.payments.charge(&hold, 500, "KZT").await.unwrap();

        let store = Arc::new(FaultyStore::new(f.store.clone()));
        let tickets = TicketIssuance::new(
            store.clone(),
            f.clock.clone(),
            TicketPolicy::clone(&f.tickets.policy),
            PaymentSimulator::from_config(
                &PaymentConfig { processing_delay_ms: 0, signing_secret: "test".to_string() },
                store.clone(),
                f.clock.clone(),
            ),
        );

        // Билет выпускается по этому платежу между проверкой и void
        let mut confirmed = hold.clone();
        confirmed.apply(ClaimAction::Confirm, f.clock.now()).unwrap();
        confirmed.payment_ref = Some(charged.id);
        store.write_before_void(confirmed);

        let err = tickets.cancel_payment(charged.id).await.unwrap_err();
        assert!(matches!(err, ClaimError::Conflict(_)));

        let payment = f.store.find_payment(charged.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        let ticket = f.store.find_claim(hold.id).await.unwrap().unwrap();
        assert_eq!(ticket.status, ClaimStatus::Active);
        assert_eq!(ticket.payment_ref, Some(charged.id));
    }

    #[tokio::test]
    async fn confirmed_minus_cancelled_is_what_the_counters_show() {
        let f = fixture(Duration::days(3)).await;
        let mut issued = Vec::new();
        for seat in 1..=6 {
            let attendee = Uuid::new_v4();
            let hold = reserve(&f, seat, attendee, 15).await;
            issued.push((f.tickets.confirm_reservation(confirmation(hold.id, attendee)).await.unwrap(), attendee));
        }
        for (ticket, attendee) in issued.iter().take(2) {
            f.tickets.cancel_ticket(ticket.id, owner(*attendee), None).await.unwrap();
        }

        let totals = analytics(&f).await;
        assert_eq!(totals.tickets_sold, 4);
        assert_eq!(totals.attendees, 4);
    }
}
