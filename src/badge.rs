//! Outstanding/overdue aggregation for the badge and today's view.
//!
//! Always a full recompute from schedules and intake history; nothing is
//! patched incrementally, so the count cannot drift from reconciliation.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::intake;
use crate::models::{IntakeRecord, IntakeStatus, MedicationSchedule, TimeSlot};
use crate::occurrence::OccurrenceKey;

/// Host badge display.
pub trait BadgeDisplay: Send + Sync {
    fn set_badge_count(&self, count: u32);
}

/// Badge that just remembers the last count.
#[derive(Debug, Default)]
pub struct InMemoryBadge {
    count: AtomicU32,
}

impl InMemoryBadge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl BadgeDisplay for InMemoryBadge {
    fn set_badge_count(&self, count: u32) {
        self.count.store(count, Ordering::SeqCst);
    }
}

/// One of today's occurrences, as shown in the daily list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccurrenceView {
    pub occurrence_key: String,
    pub medication_id: String,
    pub medication_name: String,
    pub dose: String,
    pub slot: TimeSlot,
    pub scheduled_at: NaiveDateTime,
    pub status: Option<IntakeStatus>,
    /// Past the grace window and not taken or skipped.
    pub overdue: bool,
}

/// Every slot of every enabled medication for the calendar day of `now`,
/// ordered by scheduled time.
pub fn today_occurrences(
    schedules: &[MedicationSchedule],
    records: &[IntakeRecord],
    grace_minutes: i64,
    now: NaiveDateTime,
) -> Vec<OccurrenceView> {
    let today = now.date();
    // Negative windows count as none; oversized ones never elapse.
    let grace = Duration::try_minutes(grace_minutes.max(0));

    let mut views: Vec<OccurrenceView> = schedules
        .iter()
        .filter(|med| med.enabled)
        .flat_map(|med| {
            med.unique_slots().into_iter().map(move |slot| {
                let key = OccurrenceKey::new(&med.id, today, slot);
                let scheduled_at = slot.on(today);
                let status = intake::current_status(med, &key, records);
                let past_grace = grace
                    .and_then(|grace| scheduled_at.checked_add_signed(grace))
                    .is_some_and(|due| now >= due);
                OccurrenceView {
                    occurrence_key: key.encode(),
                    medication_id: med.id.clone(),
                    medication_name: med.name.clone(),
                    dose: med.dose.clone(),
                    slot,
                    scheduled_at,
                    status,
                    overdue: past_grace && !status.is_some_and(|s| s.is_resolved()),
                }
            })
        })
        .collect();

    views.sort_by(|a, b| {
        a.scheduled_at
            .cmp(&b.scheduled_at)
            .then_with(|| a.medication_id.cmp(&b.medication_id))
    });
    views
}

/// Number of today's occurrences past grace with no Taken/Skipped record.
/// A Snoozed record does not resolve an occurrence.
pub fn compute_outstanding(
    schedules: &[MedicationSchedule],
    records: &[IntakeRecord],
    grace_minutes: i64,
    now: NaiveDateTime,
) -> u32 {
    today_occurrences(schedules, records, grace_minutes, now)
        .iter()
        .filter(|view| view.overdue)
        .count() as u32
}
