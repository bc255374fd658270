//! Crate-level error taxonomy.
//!
//! Store failures propagate to the caller of an engine entry point.
//! Delivery failures normally stay inside a `SyncReport`; they only
//! surface here when an operation cannot proceed at all.

use thiserror::Error;

use crate::delivery::DeliveryError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Delivery service error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Invalid time slot: {0}")]
    InvalidTimeSlot(String),

    #[error("Reminder engine is not running")]
    EngineStopped,
}
