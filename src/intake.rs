//! Intake reconciliation.
//!
//! History is append-only. The current status of an occurrence is the
//! newest record whose key matches it (latest timestamp, then latest
//! append). An upsert is therefore just an append under the occurrence's
//! canonical key; older records stay for analytics but stop being
//! authoritative.
//!
//! Matching rules:
//! - a record with a current-format slot key matches exactly that occurrence;
//! - a record with a legacy slot key matches that slot on its own calendar day;
//! - a record without a slot key matches only when the medication has
//!   exactly one slot (single-slot fallback), on its own calendar day.

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{IntakeRecord, IntakeStatus, MedicationSchedule, TimeSlot};
use crate::occurrence::{OccurrenceKey, TriggerKey};
use crate::store::{ReminderStore, StoreError};

/// Why an upsert was turned into a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// No slot given and the medication does not have exactly one.
    SlotRequired { slot_count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Recorded against a concrete occurrence.
    Recorded { key: OccurrenceKey, record: IntakeRecord },
    /// Recorded without a slot; kept for history, matches no slot of a
    /// multi-slot medication.
    MedicationLevel { record: IntakeRecord },
    Rejected(RejectReason),
}

impl UpsertOutcome {
    pub fn record(&self) -> Option<&IntakeRecord> {
        match self {
            Self::Recorded { record, .. } | Self::MedicationLevel { record } => Some(record),
            Self::Rejected(_) => None,
        }
    }
}

/// Occurrence an upsert for `(medication, slot, day)` lands on. `None`
/// when no slot is given and the medication has no single slot.
pub fn resolve_occurrence(
    medication: &MedicationSchedule,
    slot: Option<TimeSlot>,
    day: NaiveDate,
) -> Option<OccurrenceKey> {
    let slot = slot.or_else(|| medication.single_slot())?;
    Some(OccurrenceKey::new(&medication.id, day, slot))
}

/// Append `status` for the occurrence `(medication, day, slot)`.
///
/// `day` defaults to the calendar day of `at`. A slot outside the
/// medication's schedule is still recorded under its canonical key (the
/// schedule may have been edited after the trigger went out).
pub fn upsert(
    store: &mut dyn ReminderStore,
    medication: &MedicationSchedule,
    status: IntakeStatus,
    slot: Option<TimeSlot>,
    day: Option<NaiveDate>,
    at: NaiveDateTime,
) -> Result<UpsertOutcome, StoreError> {
    let day = day.unwrap_or_else(|| at.date());
    let Some(key) = resolve_occurrence(medication, slot, day) else {
        let slot_count = medication.unique_slots().len();
        tracing::warn!(
            medication_id = %medication.id,
            slot_count,
            status = %status,
            "Intake without slot for medication without a single slot; ignoring"
        );
        return Ok(UpsertOutcome::Rejected(RejectReason::SlotRequired { slot_count }));
    };

    if !medication.has_slot(key.slot) {
        tracing::warn!(
            medication_id = %medication.id,
            slot = %key.slot,
            "Recording intake for a slot no longer in the schedule"
        );
    }

    let record = IntakeRecord::new(&medication.id, status, Some(key.encode()), at);
    store.append_intake(&record)?;
    tracing::info!(occurrence = %key, status = %status, "Intake recorded");
    Ok(UpsertOutcome::Recorded { key, record })
}

/// Append a record with no slot. Used when a trigger identifier could not
/// be tied to any slot: the response is kept rather than dropped.
pub fn record_medication_level(
    store: &mut dyn ReminderStore,
    medication_id: &str,
    status: IntakeStatus,
    at: NaiveDateTime,
) -> Result<UpsertOutcome, StoreError> {
    let record = IntakeRecord::new(medication_id, status, None, at);
    store.append_intake(&record)?;
    tracing::info!(medication_id, status = %status, "Medication-level intake recorded");
    Ok(UpsertOutcome::MedicationLevel { record })
}

/// Whether `record` speaks for the occurrence `key` of `medication`.
pub fn record_matches(record: &IntakeRecord, medication: &MedicationSchedule, key: &OccurrenceKey) -> bool {
    if record.medication_id != key.medication_id {
        return false;
    }
    let same_day = record.recorded_at.date() == key.day;
    match record.slot_key.as_deref().map(TriggerKey::decode) {
        Some(TriggerKey::Occurrence(recorded)) => recorded == *key,
        Some(TriggerKey::Legacy { slot, .. }) => same_day && slot == key.slot,
        _ => same_day && medication.single_slot() == Some(key.slot),
    }
}

/// Newest record for the occurrence, if any.
pub fn current_record<'a>(
    medication: &MedicationSchedule,
    key: &OccurrenceKey,
    records: &'a [IntakeRecord],
) -> Option<&'a IntakeRecord> {
    // max_by_key keeps the last of equal maxima: append order breaks ties.
    records
        .iter()
        .filter(|r| record_matches(r, medication, key))
        .max_by_key(|r| r.recorded_at)
}

pub fn current_status(
    medication: &MedicationSchedule,
    key: &OccurrenceKey,
    records: &[IntakeRecord],
) -> Option<IntakeStatus> {
    current_record(medication, key, records).map(|r| r.status)
}

/// Start of the window of records that can speak for occurrences on `day`.
pub fn lookup_window_start(day: NaiveDate) -> NaiveDateTime {
    day.and_time(chrono::NaiveTime::MIN)
}
