//! Schedule / intake persistence seam.
//!
//! The engine treats the store as the source of truth for schedules and
//! intake history and never caches either across calls. Failures here
//! propagate to the caller: losing an intake record silently is a
//! correctness bug, not a recoverable condition.

pub mod error;
pub mod memory;
pub mod sqlite;

use chrono::NaiveDateTime;

use crate::models::{IntakeRecord, MedicationSchedule};
use crate::suppression::SuppressionCache;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::{open_database, open_memory_database, SqliteStore};

pub trait ReminderStore: Send {
    /// All schedules, ordered by id.
    fn list_medications(&self) -> Result<Vec<MedicationSchedule>, StoreError>;

    fn get_medication(&self, id: &str) -> Result<Option<MedicationSchedule>, StoreError>;

    /// Insert or replace a schedule.
    fn save_medication(&mut self, medication: &MedicationSchedule) -> Result<(), StoreError>;

    /// Returns false when no schedule had this id.
    fn delete_medication(&mut self, id: &str) -> Result<bool, StoreError>;

    /// Append one intake record. Never updates an existing one.
    fn append_intake(&mut self, record: &IntakeRecord) -> Result<(), StoreError>;

    /// Records at or after `since`, oldest first, append order on ties.
    fn intake_since(
        &self,
        medication_id: Option<&str>,
        since: NaiveDateTime,
    ) -> Result<Vec<IntakeRecord>, StoreError>;

    fn load_suppression(&self) -> Result<SuppressionCache, StoreError>;

    fn save_suppression(&mut self, cache: &SuppressionCache) -> Result<(), StoreError>;
}
