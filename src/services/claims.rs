//! Lookup, ownership and write helpers shared by reservations and tickets.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ClaimError, ClaimResult, StoreError};
use crate::models::{ClaimAction, Event, SeatClaim};
use crate::store::ClaimStore;

/// Attempts at a read-transition-write cycle before giving up with `Conflict`.
pub const MAX_SWAP_ATTEMPTS: usize = 5;

pub async fn load_event(store: &dyn ClaimStore, event_id: Uuid) -> ClaimResult<Event> {
    store
        .find_event(event_id)
        .await?
        .ok_or(ClaimError::NotFound("event"))
}

/// Event must exist, accept claims and contain the seat.
pub async fn load_open_event(store: &dyn ClaimStore, event_id: Uuid, seat_number: i32) -> ClaimResult<Event> {
    let event = load_event(store, event_id).await?;
    if !event.status.accepts_claims() {
        return Err(ClaimError::InvalidState(format!(
            "event is {} and does not accept reservations",
            event.status
        )));
    }
    if !event.has_seat(seat_number) {
        return Err(ClaimError::invalid_field(
            "seatNumber",
            format!("seat number must be between 1 and {}", event.capacity),
        ));
    }
    Ok(event)
}

pub async fn load_claim(store: &dyn ClaimStore, claim_id: Uuid, what: &'static str) -> ClaimResult<SeatClaim> {
    store
        .find_claim(claim_id)
        .await?
        .ok_or(ClaimError::NotFound(what))
}

pub fn ensure_owner(claim: &SeatClaim, attendee_id: Uuid, what: &str) -> ClaimResult<()> {
    if claim.attendee_id != attendee_id {
        return Err(ClaimError::Forbidden(format!("{what} belongs to another attendee")));
    }
    Ok(())
}

/// Read, change, compare-and-swap. `change` sees a fresh copy on every attempt;
/// an `Err` from it aborts without writing. Unchanged claims are not written.
pub async fn mutate_claim<R, F>(
    store: &dyn ClaimStore,
    claim_id: Uuid,
    what: &'static str,
    now: DateTime<Utc>,
    mut change: F,
) -> ClaimResult<(SeatClaim, R)>
where
    F: FnMut(&mut SeatClaim) -> ClaimResult<R>,
{
    for attempt in 1..=MAX_SWAP_ATTEMPTS {
        let current = load_claim(store, claim_id, what).await?;
        let mut next = current.clone();
        let outcome = change(&mut next)?;
        if next == current {
            return Ok((current, outcome));
        }

        next.updated_at = now;
        if store.update_claim(&next, current.version).await? {
            next.version = current.version + 1;
            return Ok((next, outcome));
        }
        debug!(%claim_id, attempt, "claim changed concurrently, retrying");
    }

    Err(ClaimError::Conflict(format!(
        "{what} is being modified concurrently, try again"
    )))
}

/// Cancels a hold whose window has closed. `Ok(false)` means there was nothing
/// to do: the claim was confirmed, cancelled or extended in the meantime.
pub async fn expire_if_due(store: &dyn ClaimStore, claim_id: Uuid, now: DateTime<Utc>) -> ClaimResult<bool> {
    let (_, expired) = mutate_claim(store, claim_id, "reservation", now, |claim| {
        if !claim.is_expired_hold(now) {
            return Ok(false);
        }
        claim.apply(ClaimAction::Expire, now)?;
        Ok(true)
    })
    .await?;
    Ok(expired)
}

/// Inserts a new live claim, relying on the store to reject a second live
/// claim for the seat. A stale hold found on the seat is expired first and the
/// insert is tried once more.
pub async fn insert_exclusive(store: &dyn ClaimStore, claim: &SeatClaim, now: DateTime<Utc>) -> ClaimResult<()> {
    for attempt in 0..2 {
        match store.insert_claim(claim).await {
            Ok(()) => return Ok(()),
            Err(StoreError::SeatTaken) if attempt == 0 => {
                let released = match store.find_live_claim(claim.event_id, claim.seat_number).await? {
                    Some(holder) if holder.is_expired_hold(now) => {
                        let expired = expire_if_due(store, holder.id, now).await?;
                        if expired {
                            info!(
                                event_id = %claim.event_id,
                                seat = claim.seat_number,
                                stale_claim = %holder.id,
                                "Released stale hold before new claim"
                            );
                        }
                        expired
                    }
                    Some(_) => false,
                    // Держатель места успел уйти между insert и lookup
                    None => true,
                };
                if !released {
                    break;
                }
            }
            Err(StoreError::SeatTaken) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Err(ClaimError::Conflict(format!(
        "seat {} is already taken",
        claim.seat_number
    )))
}
