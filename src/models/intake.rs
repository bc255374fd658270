use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::IntakeStatus;

/// One user response to a reminder. Records are append-only; the newest
/// record for an occurrence is the authoritative one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub id: Uuid,
    pub medication_id: String,
    pub recorded_at: NaiveDateTime,
    pub status: IntakeStatus,
    /// Occurrence key the response was given for. `None` for
    /// medication-level records.
    pub slot_key: Option<String>,
}

impl IntakeRecord {
    pub fn new(
        medication_id: impl Into<String>,
        status: IntakeStatus,
        slot_key: Option<String>,
        recorded_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            medication_id: medication_id.into(),
            recorded_at,
            status,
            slot_key,
        }
    }
}
