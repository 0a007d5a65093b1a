pub mod claim;
pub mod event;
pub mod payment;

pub use claim::{CheckIn, ClaimAction, ClaimStatus, SeatClaim, TransferRecord};
pub use event::{AnalyticsDelta, Event, EventAnalytics, EventStatus};
pub use payment::{PaymentRecord, PaymentStatus};
