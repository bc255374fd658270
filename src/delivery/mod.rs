//! Seam to the host's local-notification delivery service.
//!
//! The host owns the live set of pending triggers; the engine only talks
//! to it through [`DeliveryService`], so tests run against
//! [`InMemoryDeliveryService`].

pub mod memory;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::PendingTrigger;

pub use memory::{DeliveryCall, InMemoryDeliveryService};
pub use registry::{SyncReport, TriggerRegistry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Trigger {id} rejected: {reason}")]
    Rejected { id: String, reason: String },

    #[error("Delivery service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Install a one-shot trigger. An existing trigger with the same id is replaced.
    async fn enqueue(&self, trigger: PendingTrigger) -> Result<(), DeliveryError>;

    /// Remove pending triggers. Unknown ids are ignored.
    async fn cancel(&self, ids: &[String]) -> Result<(), DeliveryError>;

    /// Pending (not yet delivered) triggers whose id starts with `prefix`.
    async fn list_pending(&self, prefix: &str) -> Result<Vec<PendingTrigger>, DeliveryError>;
}
