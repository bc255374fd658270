//! Action dispatcher.
//!
//! Every response to a reminder, whether it arrives from a delivered
//! trigger or from the in-app list, ends up in [`apply`]. For a terminal
//! answer (taken / skipped) the steps run in a fixed order: mark
//! suppressed, record intake, cancel the occurrence's pending triggers,
//! resync the medication, recompute the badge. A snooze records intake,
//! replaces the live snooze and recomputes the badge; the base trigger of
//! the occurrence stays so the slot still fires if the snooze is ignored.

use chrono::{NaiveDate, NaiveDateTime};

use crate::core_state::CoreState;
use crate::delivery::SyncReport;
use crate::error::ReminderError;
use crate::intake::{self, RejectReason, UpsertOutcome};
use crate::models::{IntakeStatus, MedicationSchedule, TimeSlot, TriggerPayload};
use crate::occurrence::{self, OccurrenceKey, TriggerKey};
use crate::store::StoreError;

pub const ACTION_TAKEN: &str = "TAKEN";
pub const ACTION_SKIPPED: &str = "SKIPPED";
pub const ACTION_SNOOZE: &str = "SNOOZE";

/// What the user answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderAction {
    Taken,
    Skipped,
    /// `None` means the configured default length.
    Snooze { minutes: Option<u32> },
    /// Host default tap/dismiss and anything else we do not handle.
    Unknown(String),
}

impl ReminderAction {
    pub fn parse(action_id: &str) -> Self {
        let normalized = action_id.trim().to_ascii_uppercase();
        match normalized.as_str() {
            ACTION_TAKEN => Self::Taken,
            ACTION_SKIPPED | "SKIP" => Self::Skipped,
            ACTION_SNOOZE => Self::Snooze { minutes: None },
            other => match other
                .strip_prefix("SNOOZE_")
                .and_then(|m| m.parse::<u32>().ok())
                .filter(|m| *m > 0)
            {
                Some(minutes) => Self::Snooze {
                    minutes: Some(minutes),
                },
                None => Self::Unknown(action_id.to_string()),
            },
        }
    }

    /// Action id a host should attach to the notification button.
    pub fn identifier(&self) -> String {
        match self {
            Self::Taken => ACTION_TAKEN.to_string(),
            Self::Skipped => ACTION_SKIPPED.to_string(),
            Self::Snooze { minutes: None } => ACTION_SNOOZE.to_string(),
            Self::Snooze { minutes: Some(m) } => format!("{ACTION_SNOOZE}_{m}"),
            Self::Unknown(raw) => raw.clone(),
        }
    }

    pub fn status(&self) -> Option<IntakeStatus> {
        match self {
            Self::Taken => Some(IntakeStatus::Taken),
            Self::Skipped => Some(IntakeStatus::Skipped),
            Self::Snooze { .. } => Some(IntakeStatus::Snoozed),
            Self::Unknown(_) => None,
        }
    }

    fn from_status(status: IntakeStatus) -> Self {
        match status {
            IntakeStatus::Taken => Self::Taken,
            IntakeStatus::Skipped => Self::Skipped,
            IntakeStatus::Snoozed => Self::Snooze { minutes: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownAction(String),
    UnknownMedication(String),
}

/// Result of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Taken or skipped against a concrete occurrence.
    Resolved {
        key: OccurrenceKey,
        status: IntakeStatus,
        report: SyncReport,
        outstanding: u32,
    },
    Snoozed {
        key: Option<OccurrenceKey>,
        minutes: u32,
        report: SyncReport,
        outstanding: u32,
    },
    /// The slot could not be determined; status kept without one.
    MedicationLevel {
        medication_id: String,
        status: IntakeStatus,
        outstanding: u32,
    },
    Rejected {
        medication_id: String,
        reason: RejectReason,
    },
    Ignored(IgnoreReason),
}

/// Where an action lands.
struct Target {
    slot: Option<TimeSlot>,
    day: Option<NaiveDate>,
    /// Keep the answer without a slot rather than rejecting it.
    medication_level_fallback: bool,
}

/// Handle an action coming back from a delivered trigger.
pub async fn dispatch(
    state: &mut CoreState,
    trigger_id: &str,
    action_id: &str,
    payload: Option<&TriggerPayload>,
) -> Result<DispatchOutcome, ReminderError> {
    let action = ReminderAction::parse(action_id);
    if let ReminderAction::Unknown(raw) = &action {
        tracing::info!(trigger_id, action_id = %raw, "Ignoring unsupported reminder action");
        return Ok(DispatchOutcome::Ignored(IgnoreReason::UnknownAction(raw.clone())));
    }

    let decoded = TriggerKey::decode(trigger_id);
    if let TriggerKey::Unrecognized { .. } = decoded {
        tracing::warn!(trigger_id, "Undecodable trigger identifier; falling back to medication-level handling");
    }

    let Some(medication) = find_medication(state, &decoded, payload)? else {
        let medication_id = payload
            .map(|p| p.medication_id.as_str())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| decoded.medication_id())
            .to_string();
        tracing::warn!(trigger_id, medication_id = %medication_id, "Action for unknown medication; cancelling its triggers");
        if let Err(e) = state.try_cancel_medication(&medication_id).await {
            tracing::warn!(medication_id = %medication_id, error = %e, "Could not cancel triggers of unknown medication");
        }
        return Ok(DispatchOutcome::Ignored(IgnoreReason::UnknownMedication(medication_id)));
    };

    let target = Target {
        slot: decoded.slot().or_else(|| payload.and_then(|p| p.slot)),
        day: decoded.day().or_else(|| payload.and_then(|p| p.day)),
        medication_level_fallback: true,
    };
    tracing::debug!(trigger_id, action = ?action, "Dispatching reminder action");
    apply(state, &medication, action, target).await
}

/// Handle an answer given in the app for today's occurrence of `slot`.
/// `slot` may be omitted only for single-slot medications.
pub async fn record_intake(
    state: &mut CoreState,
    medication_id: &str,
    status: IntakeStatus,
    slot: Option<TimeSlot>,
) -> Result<DispatchOutcome, ReminderError> {
    let medication = state
        .medication(medication_id)?
        .ok_or_else(|| StoreError::NotFound {
            entity_type: "medication".into(),
            id: medication_id.to_string(),
        })?;

    let target = Target {
        slot,
        day: Some(state.today()),
        medication_level_fallback: false,
    };
    apply(state, &medication, ReminderAction::from_status(status), target).await
}

async fn apply(
    state: &mut CoreState,
    medication: &MedicationSchedule,
    action: ReminderAction,
    target: Target,
) -> Result<DispatchOutcome, ReminderError> {
    let now = state.now();
    let day = target.day.unwrap_or_else(|| now.date());
    let key = intake::resolve_occurrence(medication, target.slot, day);

    match action {
        ReminderAction::Taken | ReminderAction::Skipped => {
            let status = action.status().unwrap_or(IntakeStatus::Taken);
            match key {
                Some(key) => resolve(state, medication, key, status, now).await,
                None => unslotted(state, medication, status, now, target.medication_level_fallback),
            }
        }
        ReminderAction::Snooze { minutes } => {
            let minutes = minutes.unwrap_or(state.config().default_snooze_minutes);
            snooze(state, medication, key, minutes, now, target.medication_level_fallback).await
        }
        ReminderAction::Unknown(raw) => Ok(DispatchOutcome::Ignored(IgnoreReason::UnknownAction(raw))),
    }
}

async fn resolve(
    state: &mut CoreState,
    medication: &MedicationSchedule,
    key: OccurrenceKey,
    status: IntakeStatus,
    now: NaiveDateTime,
) -> Result<DispatchOutcome, ReminderError> {
    state.mark_suppressed(&key);
    intake::upsert(
        state.store.as_mut(),
        medication,
        status,
        Some(key.slot),
        Some(key.day),
        now,
    )?;

    let mut report = match state.registry.cancel_occurrence(&key).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(occurrence = %key, error = %e, "Could not cancel occurrence triggers");
            SyncReport::failed(e)
        }
    };
    report.merge(state.resync(medication).await);

    let outstanding = state.refresh_badge()?;
    tracing::info!(
        occurrence = %key,
        status = %status,
        cancelled = report.cancelled.len(),
        outstanding,
        "Occurrence resolved"
    );
    Ok(DispatchOutcome::Resolved {
        key,
        status,
        report,
        outstanding,
    })
}

async fn snooze(
    state: &mut CoreState,
    medication: &MedicationSchedule,
    key: Option<OccurrenceKey>,
    minutes: u32,
    now: NaiveDateTime,
    medication_level_fallback: bool,
) -> Result<DispatchOutcome, ReminderError> {
    match &key {
        Some(key) => {
            intake::upsert(
                state.store.as_mut(),
                medication,
                IntakeStatus::Snoozed,
                Some(key.slot),
                Some(key.day),
                now,
            )?;
        }
        None if medication_level_fallback => {
            intake::record_medication_level(
                state.store.as_mut(),
                &medication.id,
                IntakeStatus::Snoozed,
                now,
            )?;
        }
        None => return reject(state, medication, IntakeStatus::Snoozed, now),
    }

    let slot = key.as_ref().map(|k| k.slot);
    let day = key.as_ref().map(|k| k.day);
    let report = match state
        .registry
        .schedule_snooze(medication, minutes, slot, day, now)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(medication_id = %medication.id, error = %e, "Could not schedule snooze");
            SyncReport::failed(e)
        }
    };

    let outstanding = state.refresh_badge()?;
    tracing::info!(
        medication_id = %medication.id,
        slot = ?slot,
        minutes,
        outstanding,
        "Reminder snoozed"
    );
    Ok(DispatchOutcome::Snoozed {
        key,
        minutes,
        report,
        outstanding,
    })
}

/// Taken/skipped with no slot on a multi-slot medication.
fn unslotted(
    state: &mut CoreState,
    medication: &MedicationSchedule,
    status: IntakeStatus,
    now: NaiveDateTime,
    medication_level_fallback: bool,
) -> Result<DispatchOutcome, ReminderError> {
    if !medication_level_fallback {
        return reject(state, medication, status, now);
    }
    intake::record_medication_level(state.store.as_mut(), &medication.id, status, now)?;
    let outstanding = state.refresh_badge()?;
    Ok(DispatchOutcome::MedicationLevel {
        medication_id: medication.id.clone(),
        status,
        outstanding,
    })
}

fn reject(
    state: &mut CoreState,
    medication: &MedicationSchedule,
    status: IntakeStatus,
    now: NaiveDateTime,
) -> Result<DispatchOutcome, ReminderError> {
    match intake::upsert(state.store.as_mut(), medication, status, None, None, now)? {
        UpsertOutcome::Rejected(reason) => Ok(DispatchOutcome::Rejected {
            medication_id: medication.id.clone(),
            reason,
        }),
        // Unreachable for a medication without a single slot; kept total.
        _ => Ok(DispatchOutcome::MedicationLevel {
            medication_id: medication.id.clone(),
            status,
            outstanding: state.refresh_badge()?,
        }),
    }
}

/// Medication a trigger belongs to. Undecodable identifiers are matched by
/// trimming `_`-separated segments from the right until a stored id fits.
fn find_medication(
    state: &CoreState,
    decoded: &TriggerKey,
    payload: Option<&TriggerPayload>,
) -> Result<Option<MedicationSchedule>, StoreError> {
    if let Some(id) = payload.map(|p| p.medication_id.as_str()).filter(|id| !id.is_empty()) {
        if let Some(medication) = state.medication(id)? {
            return Ok(Some(medication));
        }
    }

    let mut candidate = decoded.medication_id();
    if let Some(medication) = state.medication(candidate)? {
        return Ok(Some(medication));
    }
    if let TriggerKey::Legacy { medication_id, .. } = decoded {
        // A current-format id whose day segment is not a real date.
        if let Some((head, stamp)) = medication_id.rsplit_once('_') {
            if occurrence::is_day_stamp(stamp) {
                return state.medication(head);
            }
        }
    }
    if decoded.slot().is_some() {
        return Ok(None);
    }
    while let Some((head, _)) = candidate.rsplit_once('_') {
        if let Some(medication) = state.medication(head)? {
            tracing::debug!(medication_id = head, "Matched medication by identifier prefix");
            return Ok(Some(medication));
        }
        candidate = head;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::badge::InMemoryBadge;
    use crate::clock::FixedClock;
    use crate::config::ReminderConfig;
    use crate::delivery::InMemoryDeliveryService;
    use crate::store::{MemoryStore, ReminderStore};

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn slot(h: u32, m: u32) -> TimeSlot {
        TimeSlot::new(h, m).unwrap()
    }

    fn metformin() -> MedicationSchedule {
        MedicationSchedule::new("metformin", "Metformin", "500mg", vec![slot(8, 0), slot(20, 0)])
    }

    async fn setup(
        now: NaiveDateTime,
        meds: Vec<MedicationSchedule>,
    ) -> (CoreState, MemoryStore, Arc<InMemoryDeliveryService>, Arc<FixedClock>) {
        let store = MemoryStore::with_medications(meds);
        let delivery = Arc::new(InMemoryDeliveryService::new());
        let clock = Arc::new(FixedClock::new(now));
        let mut state = CoreState::new(
            Box::new(store.clone()),
            delivery.clone(),
            clock.clone(),
            Arc::new(InMemoryBadge::new()),
            ReminderConfig::default(),
        )
        .unwrap();
        state.app_became_active().await.unwrap();
        delivery.clear_calls();
        (state, store, delivery, clock)
    }

    #[test]
    fn parses_action_identifiers() {
        assert_eq!(ReminderAction::parse("TAKEN"), ReminderAction::Taken);
        assert_eq!(ReminderAction::parse("taken"), ReminderAction::Taken);
        assert_eq!(ReminderAction::parse("Skip"), ReminderAction::Skipped);
        assert_eq!(ReminderAction::parse("SKIPPED"), ReminderAction::Skipped);
        assert_eq!(ReminderAction::parse("snooze"), ReminderAction::Snooze { minutes: None });
        assert_eq!(
            ReminderAction::parse("SNOOZE_15"),
            ReminderAction::Snooze { minutes: Some(15) }
        );
        assert_eq!(
            ReminderAction::parse("SNOOZE_0"),
            ReminderAction::Unknown("SNOOZE_0".into())
        );
        assert_eq!(
            ReminderAction::parse("com.apple.UNNotificationDefaultActionIdentifier"),
            ReminderAction::Unknown("com.apple.UNNotificationDefaultActionIdentifier".into())
        );
    }

    #[test]
    fn identifier_parses_back() {
        for action in [
            ReminderAction::Taken,
            ReminderAction::Skipped,
            ReminderAction::Snooze { minutes: None },
            ReminderAction::Snooze { minutes: Some(30) },
        ] {
            assert_eq!(ReminderAction::parse(&action.identifier()), action);
        }
    }

    #[tokio::test]
    async fn taken_follows_the_full_sequence() {
        let (mut state, store, delivery, _) = setup(at(10, 8, 2), vec![metformin()]).await;
        // Trigger for 08:00 already delivered; tomorrow's is what resync installed.
        let outcome = dispatch(&mut state, "metformin_20250110_08_00", "TAKEN", None)
            .await
            .unwrap();

        let DispatchOutcome::Resolved { key, status, .. } = outcome else {
            panic!("expected a resolved outcome, got {outcome:?}");
        };
        assert_eq!(key.encode(), "metformin_20250110_08_00");
        assert_eq!(status, IntakeStatus::Taken);
        assert_eq!(store.intake_records().len(), 1);
        assert!(!state.will_present("metformin_20250110_08_00"));
        assert_eq!(
            delivery.pending_ids(),
            vec!["metformin_20250110_20_00", "metformin_20250111_08_00"]
        );
    }

    #[tokio::test]
    async fn taken_before_fire_moves_slot_to_tomorrow() {
        let (mut state, _, delivery, _) = setup(at(10, 7, 50), vec![metformin()]).await;
        assert!(delivery.pending_ids().contains(&"metformin_20250110_08_00".to_string()));

        record_intake(&mut state, "metformin", IntakeStatus::Taken, Some(slot(8, 0)))
            .await
            .unwrap();
        assert_eq!(
            delivery.pending_ids(),
            vec!["metformin_20250110_20_00", "metformin_20250111_08_00"]
        );
        let cancelled = delivery.cancelled_ids();
        assert_eq!(cancelled[0], "metformin_20250110_08_00");
        assert_eq!(
            cancelled.iter().filter(|id| *id == "metformin_20250110_08_00").count(),
            1
        );
    }

    #[tokio::test]
    async fn snooze_keeps_base_trigger_and_adds_one_snooze() {
        let (mut state, store, delivery, _) = setup(at(10, 8, 1), vec![metformin()]).await;
        dispatch(&mut state, "metformin_20250110_08_00", "SNOOZE_15", None)
            .await
            .unwrap();
        dispatch(&mut state, "snooze_metformin_08_00", "snooze", None)
            .await
            .unwrap();

        let snoozes: Vec<_> = delivery
            .pending()
            .into_iter()
            .filter(|t| t.id.starts_with("snooze_"))
            .collect();
        assert_eq!(snoozes.len(), 1);
        assert_eq!(snoozes[0].id, "snooze_metformin_08_00");
        assert_eq!(snoozes[0].fire_at, at(10, 8, 11));
        assert!(delivery.pending_ids().contains(&"metformin_20250110_20_00".to_string()));

        let key = OccurrenceKey::new("metformin", at(10, 0, 0).date(), slot(8, 0));
        assert_eq!(state.current_status(&key).unwrap(), Some(IntakeStatus::Snoozed));
        assert_eq!(store.intake_records().len(), 2);
    }

    #[tokio::test]
    async fn snooze_payload_day_carries_across_midnight() {
        let late = MedicationSchedule::new("late", "Melatonin", "3mg", vec![slot(23, 30)]);
        let (mut state, _, _, clock) = setup(at(10, 23, 31), vec![late.clone()]).await;
        dispatch(&mut state, "late_20250110_23_30", "SNOOZE_45", None)
            .await
            .unwrap();

        clock.set(at(11, 0, 16));
        let payload = TriggerPayload::for_medication(&late)
            .with_occurrence(Some(slot(23, 30)), Some(at(10, 0, 0).date()));
        let outcome = dispatch(&mut state, "snooze_late_23_30", "TAKEN", Some(&payload))
            .await
            .unwrap();
        let DispatchOutcome::Resolved { key, .. } = outcome else {
            panic!("expected a resolved outcome, got {outcome:?}");
        };
        assert_eq!(key.encode(), "late_20250110_23_30");
    }

    #[tokio::test]
    async fn unknown_action_changes_nothing() {
        let (mut state, store, delivery, _) = setup(at(10, 8, 1), vec![metformin()]).await;
        let outcome = dispatch(&mut state, "metformin_20250110_08_00", "DEFAULT", None)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::UnknownAction("DEFAULT".into())));
        assert!(store.intake_records().is_empty());
        assert!(delivery.calls().is_empty());
    }

    #[tokio::test]
    async fn undecodable_identifier_records_medication_level() {
        let (mut state, store, _, _) = setup(at(10, 8, 1), vec![metformin()]).await;
        let outcome = dispatch(&mut state, "metformin_garbage", "TAKEN", None)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::MedicationLevel { .. }));
        let records = store.intake_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].slot_key, None);
    }

    #[tokio::test]
    async fn undecodable_identifier_of_single_slot_medication_uses_its_slot() {
        let levo = MedicationSchedule::new("levo", "Levothyroxine", "50mcg", vec![slot(7, 0)]);
        let (mut state, store, _, _) = setup(at(10, 7, 5), vec![levo]).await;
        let outcome = dispatch(&mut state, "levo", "TAKEN", None).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Resolved { .. }));
        assert_eq!(
            store.intake_records()[0].slot_key.as_deref(),
            Some("levo_20250110_07_00")
        );
    }

    #[tokio::test]
    async fn legacy_id_with_eight_digit_medication_suffix_is_recorded() {
        let rx = MedicationSchedule::new("rx_00000042", "Warfarin", "5mg", vec![slot(8, 0), slot(20, 0)]);
        let (mut state, store, _, _) = setup(at(10, 8, 3), vec![rx]).await;
        let outcome = dispatch(&mut state, "rx_00000042_08_00", "TAKEN", None)
            .await
            .unwrap();

        let DispatchOutcome::Resolved { key, .. } = outcome else {
            panic!("expected a resolved outcome, got {outcome:?}");
        };
        assert_eq!(key.encode(), "rx_00000042_20250110_08_00");
        assert_eq!(store.intake_records().len(), 1);
    }

    #[tokio::test]
    async fn current_id_with_impossible_day_resolves_today() {
        let (mut state, store, _, _) = setup(at(10, 8, 3), vec![metformin()]).await;
        let outcome = dispatch(&mut state, "metformin_20251399_08_00", "TAKEN", None)
            .await
            .unwrap();

        let DispatchOutcome::Resolved { key, .. } = outcome else {
            panic!("expected a resolved outcome, got {outcome:?}");
        };
        assert_eq!(key.encode(), "metformin_20250110_08_00");
        assert_eq!(store.intake_records().len(), 1);
    }

    #[tokio::test]
    async fn in_app_intake_without_slot_is_rejected_for_multi_slot() {
        let (mut state, store, _, _) = setup(at(10, 8, 1), vec![metformin()]).await;
        let outcome = record_intake(&mut state, "metformin", IntakeStatus::Taken, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected {
                medication_id: "metformin".into(),
                reason: RejectReason::SlotRequired { slot_count: 2 },
            }
        );
        assert!(store.intake_records().is_empty());
    }

    #[tokio::test]
    async fn in_app_intake_for_missing_medication_is_not_found() {
        let (mut state, _, _, _) = setup(at(10, 8, 1), vec![]).await;
        let err = record_intake(&mut state, "ghost", IntakeStatus::Taken, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReminderError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn action_for_deleted_medication_cancels_leftovers() {
        let (mut state, store, delivery, _) = setup(at(10, 7, 0), vec![metformin()]).await;
        let mut writer = store.clone();
        writer.delete_medication("metformin").unwrap();

        let outcome = dispatch(&mut state, "metformin_20250110_08_00", "TAKEN", None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Ignored(IgnoreReason::UnknownMedication("metformin".into()))
        );
        assert!(delivery.pending_ids().is_empty());
        assert!(store.intake_records().is_empty());
    }
}
