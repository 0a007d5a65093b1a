pub mod availability;
pub mod claims;
pub mod cleanup;
pub mod payment;
pub mod reservations;
pub mod tickets;

pub use availability::{AvailabilityQuery, AvailableSeats, SeatAvailability};
pub use cleanup::CleanupService;
pub use payment::PaymentSimulator;
pub use reservations::{NewReservation, ReservationManager, ReservationPolicy, SweepReport};
pub use tickets::{Caller, Confirmation, DirectIssue, RefundOutcome, TicketIssuance, TicketPolicy};
