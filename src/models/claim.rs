//! SeatClaim: one record for both a temporary hold and an issued ticket.
//!
//! The status field is a closed state machine. Every status change goes through
//! [`SeatClaim::apply`], which consults [`ClaimStatus::transition`] and keeps the
//! timestamp fields in line with the new status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Reserved,
    Active,
    Used,
    Cancelled,
    Refunded,
}

/// Things that can happen to a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimAction {
    Confirm,
    Cancel,
    Expire,
    CheckIn,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ClaimStatus,
    pub action: ClaimAction,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot {:?} a claim in status '{}'", self.action, self.from)
    }
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 5] = [
        ClaimStatus::Reserved,
        ClaimStatus::Active,
        ClaimStatus::Used,
        ClaimStatus::Cancelled,
        ClaimStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Reserved => "reserved",
            ClaimStatus::Active => "active",
            ClaimStatus::Used => "used",
            ClaimStatus::Cancelled => "cancelled",
            ClaimStatus::Refunded => "refunded",
        }
    }

    /// A live claim occupies its seat.
    pub fn is_live(&self) -> bool {
        matches!(self, ClaimStatus::Reserved | ClaimStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }

    pub fn transition(self, action: ClaimAction) -> Result<ClaimStatus, IllegalTransition> {
        use ClaimAction::*;
        use ClaimStatus::*;

        match (self, action) {
            (Reserved, Confirm) => Ok(Active),
            (Reserved, Cancel) | (Reserved, Expire) => Ok(Cancelled),
            (Active, Cancel) => Ok(Cancelled),
            (Active, CheckIn) => Ok(Used),
            (Active, Refund) => Ok(Refunded),
            // Отмененный билет еще можно вернуть деньгами
            (Cancelled, Refund) => Ok(Refunded),
            (from, action) => Err(IllegalTransition { from, action }),
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClaimStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown claim status '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub checked_in: bool,
    pub checked_in_at: DateTime<Utc>,
    pub checked_in_by: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub from_attendee_id: Uuid,
    pub to_attendee_id: Uuid,
    pub transferred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatClaim {
    pub id: Uuid,
    pub event_id: Uuid,
    pub attendee_id: Uuid,
    pub seat_number: i32,
    pub category: String,
    pub price: i64,
    pub currency: String,
    pub status: ClaimStatus,
    pub reserved_at: Option<DateTime<Utc>>,
    pub reservation_expires_at: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<Uuid>,
    pub check_in: Option<CheckIn>,
    pub is_transferred: bool,
    pub transfer_history: Vec<TransferRecord>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(skip)]
    pub version: i64,
}

/// Category written on a hold until confirmation assigns the real one.
pub const UNASSIGNED_CATEGORY: &str = "";

impl SeatClaim {
    /// New hold on a seat. Category and price stay placeholders until confirmation.
    pub fn reserved(
        event_id: Uuid,
        seat_number: i32,
        attendee_id: Uuid,
        currency: &str,
        now: DateTime<Utc>,
        hold_for: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            attendee_id,
            seat_number,
            category: UNASSIGNED_CATEGORY.to_string(),
            price: 0,
            currency: currency.to_string(),
            status: ClaimStatus::Reserved,
            reserved_at: Some(now),
            reservation_expires_at: Some(now + hold_for),
            issued_at: None,
            payment_ref: None,
            check_in: None,
            is_transferred: false,
            transfer_history: Vec::new(),
            cancelled_at: None,
            cancellation_reason: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Ticket issued directly, without a prior hold.
    pub fn issued(
        event_id: Uuid,
        seat_number: i32,
        attendee_id: Uuid,
        category: &str,
        price: i64,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            attendee_id,
            seat_number,
            category: category.to_string(),
            price,
            currency: currency.to_string(),
            status: ClaimStatus::Active,
            reserved_at: None,
            reservation_expires_at: None,
            issued_at: Some(now),
            payment_ref: None,
            check_in: None,
            is_transferred: false,
            transfer_history: Vec::new(),
            cancelled_at: None,
            cancellation_reason: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Hold whose window has closed. The sweep, the timer and insert-time
    /// takeover all use this same predicate.
    pub fn is_expired_hold(&self, now: DateTime<Utc>) -> bool {
        self.status == ClaimStatus::Reserved
            && self
                .reservation_expires_at
                .map_or(true, |expires_at| expires_at <= now)
    }

    /// Status as readers should see it: an expired hold counts as cancelled
    /// even before the sweep gets to it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ClaimStatus {
        if self.is_expired_hold(now) {
            ClaimStatus::Cancelled
        } else {
            self.status
        }
    }

    pub fn occupies_seat(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now).is_live()
    }

    pub fn is_checked_in(&self) -> bool {
        self.check_in.as_ref().is_some_and(|c| c.checked_in)
    }

    /// Moves the claim to the next status and stamps the matching timestamps.
    pub fn apply(&mut self, action: ClaimAction, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        let next = self.status.transition(action)?;
        if self.status == ClaimStatus::Reserved {
            self.reserved_at = None;
            self.reservation_expires_at = None;
        }
        match next {
            ClaimStatus::Active => self.issued_at = Some(now),
            ClaimStatus::Cancelled => self.cancelled_at = Some(now),
            ClaimStatus::Refunded => self.refunded_at = Some(now),
            ClaimStatus::Reserved | ClaimStatus::Used => {}
        }
        self.status = next;
        Ok(())
    }
}
