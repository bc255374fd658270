pub mod badge; // Outstanding count + today's view
pub mod clock;
pub mod config;
pub mod core_state;
pub mod delivery; // Delivery service seam + trigger registry
pub mod dispatcher; // Action dispatcher
pub mod engine; // Single-writer actor
pub mod error;
pub mod intake; // Intake reconciliation
pub mod models;
pub mod occurrence; // Trigger identifier codec
pub mod planner;
pub mod store;
pub mod suppression;

pub use badge::{BadgeDisplay, InMemoryBadge, OccurrenceView};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ReminderConfig;
pub use core_state::CoreState;
pub use delivery::{DeliveryError, DeliveryService, InMemoryDeliveryService, SyncReport};
pub use dispatcher::{DispatchOutcome, IgnoreReason, ReminderAction};
pub use engine::ReminderEngine;
pub use error::ReminderError;
pub use models::{IntakeRecord, IntakeStatus, MedicationSchedule, PendingTrigger, TimeSlot, TriggerPayload};
pub use occurrence::{OccurrenceKey, TriggerKey};
pub use store::{MemoryStore, ReminderStore, SqliteStore, StoreError};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honouring `RUST_LOG`. Safe to call twice;
/// the second call is a no-op.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} reminder engine v{}", config::APP_NAME, config::APP_VERSION);
    }
}
