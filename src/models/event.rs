use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Active,
    Cancelled,
    Completed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Active => "active",
            EventStatus::Cancelled => "cancelled",
            EventStatus::Completed => "completed",
        }
    }

    /// Only published or running events hand out seats.
    pub fn accepts_claims(&self) -> bool {
        matches!(self, EventStatus::Published | EventStatus::Active)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            "active" => Ok(EventStatus::Active),
            "cancelled" => Ok(EventStatus::Cancelled),
            "completed" => Ok(EventStatus::Completed),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAnalytics {
    pub tickets_sold: i64,
    pub attendees: i64,
    pub revenue: i64,
}

/// Signed change applied atomically to an event's analytics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyticsDelta {
    pub tickets_sold: i64,
    pub attendees: i64,
    pub revenue: i64,
}

impl AnalyticsDelta {
    pub fn ticket_sold(price: i64) -> Self {
        Self { tickets_sold: 1, attendees: 1, revenue: price }
    }

    pub fn ticket_cancelled() -> Self {
        Self { tickets_sold: -1, attendees: -1, revenue: 0 }
    }

    pub fn refund(amount: i64) -> Self {
        Self { tickets_sold: 0, attendees: 0, revenue: -amount }
    }

    pub fn and(self, other: AnalyticsDelta) -> Self {
        Self {
            tickets_sold: self.tickets_sold + other.tickets_sold,
            attendees: self.attendees + other.attendees,
            revenue: self.revenue + other.revenue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
    /// Venue capacity; seats are numbered 1..=capacity.
    pub capacity: i32,
    pub analytics: EventAnalytics,
}

impl Event {
    pub fn has_seat(&self, seat_number: i32) -> bool {
        (1..=self.capacity).contains(&seat_number)
    }
}
