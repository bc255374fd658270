//! Schedule planner: when does each slot fire next.
//!
//! Pure functions of local wall-clock time. A slot whose instant equals
//! `now` is already past, so a trigger never fires twice in the same tick.

use chrono::{NaiveDate, NaiveDateTime};

use crate::models::{MedicationSchedule, PendingTrigger, TimeSlot, TriggerPayload};
use crate::occurrence::OccurrenceKey;

/// Today's instant for `slot` if it is still ahead of `now`, else tomorrow's.
pub fn next_fire_instant(slot: TimeSlot, now: NaiveDateTime) -> NaiveDateTime {
    let today = slot.on(now.date());
    if today > now {
        today
    } else {
        slot.on(next_day(now.date()))
    }
}

/// Next occurrence of `slot`, skipping today's when `resolved` says it is
/// already handled.
pub fn next_occurrence(
    medication_id: &str,
    slot: TimeSlot,
    now: NaiveDateTime,
    resolved: impl Fn(&OccurrenceKey) -> bool,
) -> (OccurrenceKey, NaiveDateTime) {
    let today = now.date();
    let fire_at = next_fire_instant(slot, now);
    if fire_at.date() == today {
        let key = OccurrenceKey::new(medication_id, today, slot);
        if !resolved(&key) {
            return (key, fire_at);
        }
        let tomorrow = next_day(today);
        return (OccurrenceKey::new(medication_id, tomorrow, slot), slot.on(tomorrow));
    }
    (OccurrenceKey::new(medication_id, fire_at.date(), slot), fire_at)
}

/// One trigger per distinct slot of an enabled medication.
pub fn plan_medication(
    medication: &MedicationSchedule,
    now: NaiveDateTime,
    resolved: impl Fn(&OccurrenceKey) -> bool,
) -> Vec<PendingTrigger> {
    if !medication.enabled {
        return Vec::new();
    }

    medication
        .unique_slots()
        .into_iter()
        .map(|slot| {
            let (key, fire_at) = next_occurrence(&medication.id, slot, now, &resolved);
            PendingTrigger {
                id: key.encode(),
                fire_at,
                payload: TriggerPayload::for_medication(medication)
                    .with_occurrence(Some(slot), Some(key.day)),
            }
        })
        .collect()
}

fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(day)
}
