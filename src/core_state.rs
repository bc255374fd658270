//! State owned by the reminder engine task.
//!
//! `CoreState` is never shared: the engine actor holds it by value and
//! every mutation (intake, suppression, trigger sync) goes through
//! `&mut self`, which is what serializes writes. Schedules and intake are
//! always read back from the store, never cached here.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::badge::{self, BadgeDisplay, OccurrenceView};
use crate::clock::Clock;
use crate::config::ReminderConfig;
use crate::delivery::{DeliveryError, DeliveryService, SyncReport, TriggerRegistry};
use crate::error::ReminderError;
use crate::intake;
use crate::models::{IntakeRecord, IntakeStatus, MedicationSchedule};
use crate::occurrence::OccurrenceKey;
use crate::store::{ReminderStore, StoreError};
use crate::suppression::SuppressionCache;

pub struct CoreState {
    pub(crate) store: Box<dyn ReminderStore>,
    pub(crate) registry: TriggerRegistry,
    suppression: SuppressionCache,
    clock: Arc<dyn Clock>,
    badge: Arc<dyn BadgeDisplay>,
    config: ReminderConfig,
    /// Medications whose last sync hit a delivery failure.
    needs_resync: BTreeSet<String>,
}

impl CoreState {
    /// Build the state and restore the persisted suppression set.
    pub fn new(
        store: Box<dyn ReminderStore>,
        delivery: Arc<dyn DeliveryService>,
        clock: Arc<dyn Clock>,
        badge: Arc<dyn BadgeDisplay>,
        config: ReminderConfig,
    ) -> Result<Self, StoreError> {
        let suppression = store.load_suppression()?;
        let mut state = Self {
            store,
            registry: TriggerRegistry::new(delivery),
            suppression,
            clock,
            badge,
            config,
            needs_resync: BTreeSet::new(),
        };
        state.roll_day();
        tracing::debug!(suppressed = state.suppression.len(), "Reminder state loaded");
        Ok(state)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    pub fn config(&self) -> &ReminderConfig {
        &self.config
    }

    pub fn suppression(&self) -> &SuppressionCache {
        &self.suppression
    }

    /// Medications whose triggers may be out of date after a delivery failure.
    pub fn needs_resync(&self) -> impl Iterator<Item = &str> {
        self.needs_resync.iter().map(String::as_str)
    }

    pub fn medication(&self, id: &str) -> Result<Option<MedicationSchedule>, StoreError> {
        self.store.get_medication(id)
    }

    // ── Suppression ───────────────────────────────────────

    /// Discard yesterday's suppression set, persisting the reset.
    pub(crate) fn roll_day(&mut self) {
        let today = self.today();
        if self.suppression.normalize(today) {
            self.persist_suppression();
        }
    }

    pub(crate) fn mark_suppressed(&mut self, key: &OccurrenceKey) {
        let today = self.today();
        self.suppression.mark_suppressed_today(key, today);
        self.persist_suppression();
    }

    /// Presentation check for a delivered trigger.
    pub fn will_present(&mut self, trigger_id: &str) -> bool {
        self.roll_day();
        let show = !self.suppression.is_suppressed(trigger_id, self.today());
        if !show {
            tracing::info!(trigger_id, "Suppressing delivered reminder for resolved occurrence");
        }
        show
    }

    fn persist_suppression(&mut self) {
        // The in-memory set still protects this session.
        if let Err(e) = self.store.save_suppression(&self.suppression) {
            tracing::warn!(error = %e, "Failed to persist suppression set");
        }
    }

    // ── Trigger sync ──────────────────────────────────────

    /// Resync one medication. Errors only when the pending list is unreadable.
    pub(crate) async fn try_resync(
        &mut self,
        medication: &MedicationSchedule,
    ) -> Result<SyncReport, DeliveryError> {
        self.roll_day();
        let now = self.now();
        let result = self.registry.resync(medication, now, &self.suppression).await;
        self.track(&medication.id, result)
    }

    /// Resync with every failure folded into the report.
    pub(crate) async fn resync(&mut self, medication: &MedicationSchedule) -> SyncReport {
        self.try_resync(medication).await.unwrap_or_else(SyncReport::failed)
    }

    pub(crate) async fn try_cancel_medication(
        &mut self,
        medication_id: &str,
    ) -> Result<SyncReport, DeliveryError> {
        let result = self.registry.cancel_medication(medication_id).await;
        self.track(medication_id, result)
    }

    fn track(
        &mut self,
        medication_id: &str,
        result: Result<SyncReport, DeliveryError>,
    ) -> Result<SyncReport, DeliveryError> {
        match &result {
            Ok(report) if report.is_clean() => {
                if self.needs_resync.remove(medication_id) {
                    tracing::info!(medication_id, "Trigger sync recovered");
                }
            }
            Ok(report) => {
                tracing::warn!(
                    medication_id,
                    failures = report.failures.len(),
                    "Trigger sync incomplete; will retry on next activation"
                );
                self.needs_resync.insert(medication_id.to_string());
            }
            Err(e) => {
                tracing::warn!(medication_id, error = %e, "Trigger sync failed; will retry on next activation");
                self.needs_resync.insert(medication_id.to_string());
            }
        }
        result
    }

    // ── Lifecycle events ──────────────────────────────────

    /// Write `medication` and bring its triggers in line.
    pub async fn save_medication(
        &mut self,
        medication: &MedicationSchedule,
    ) -> Result<SyncReport, ReminderError> {
        self.store.save_medication(medication)?;
        tracing::info!(medication_id = %medication.id, slots = medication.slots.len(), "Medication saved");
        self.schedule_changed(&medication.id).await
    }

    /// Remove a medication and every trigger it still has.
    pub async fn delete_medication(&mut self, medication_id: &str) -> Result<bool, ReminderError> {
        let existed = self.store.delete_medication(medication_id)?;
        let report = self.try_cancel_medication(medication_id).await?;
        self.needs_resync.remove(medication_id);
        tracing::info!(medication_id, existed, cancelled = report.cancelled.len(), "Medication deleted");
        self.refresh_badge()?;
        Ok(existed)
    }

    /// Resync after the host edited a schedule in the store directly.
    pub async fn schedule_changed(&mut self, medication_id: &str) -> Result<SyncReport, ReminderError> {
        let report = match self.store.get_medication(medication_id)? {
            Some(medication) => self.try_resync(&medication).await?,
            None => self.try_cancel_medication(medication_id).await?,
        };
        self.refresh_badge()?;
        Ok(report)
    }

    /// Full reconciliation: resync every medication, drop triggers of
    /// medications that no longer exist, recompute the badge.
    pub async fn app_became_active(&mut self) -> Result<u32, ReminderError> {
        self.roll_day();
        let medications = self.store.list_medications()?;
        if !self.needs_resync.is_empty() {
            tracing::info!(count = self.needs_resync.len(), "Retrying medications with failed trigger sync");
        }

        let mut report = SyncReport::default();
        for medication in &medications {
            report.merge(self.resync(medication).await);
        }

        let known: HashSet<String> = medications.iter().map(|m| m.id.clone()).collect();
        self.needs_resync.retain(|id| known.contains(id));
        match self.registry.cancel_orphans(&known).await {
            Ok(orphans) => report.merge(orphans),
            Err(e) => {
                tracing::warn!(error = %e, "Could not list pending triggers for orphan cleanup");
                report.failures.push(e);
            }
        }

        let outstanding = self.refresh_badge()?;
        tracing::info!(
            medications = medications.len(),
            enqueued = report.enqueued.len(),
            cancelled = report.cancelled.len(),
            failures = report.failures.len(),
            outstanding,
            "App became active"
        );
        Ok(outstanding)
    }

    // ── Reads ─────────────────────────────────────────────

    fn load_today(&self) -> Result<(Vec<MedicationSchedule>, Vec<IntakeRecord>), StoreError> {
        let today = self.today();
        let medications = self.store.list_medications()?;
        let records = self
            .store
            .intake_since(None, intake::lookup_window_start(today))?;
        Ok((medications, records))
    }

    /// Count of today's overdue occurrences.
    pub fn outstanding(&self) -> Result<u32, StoreError> {
        let (medications, records) = self.load_today()?;
        Ok(badge::compute_outstanding(
            &medications,
            &records,
            self.config.grace_minutes,
            self.now(),
        ))
    }

    /// Recompute the outstanding count and push it to the badge.
    pub fn refresh_badge(&self) -> Result<u32, StoreError> {
        let count = self.outstanding()?;
        self.badge.set_badge_count(count);
        tracing::debug!(count, "Badge updated");
        Ok(count)
    }

    pub fn today_view(&self) -> Result<Vec<OccurrenceView>, StoreError> {
        let (medications, records) = self.load_today()?;
        Ok(badge::today_occurrences(
            &medications,
            &records,
            self.config.grace_minutes,
            self.now(),
        ))
    }

    /// Current status of one occurrence, `None` when nothing was recorded.
    pub fn current_status(&self, key: &OccurrenceKey) -> Result<Option<IntakeStatus>, StoreError> {
        let Some(medication) = self.store.get_medication(&key.medication_id)? else {
            return Ok(None);
        };
        let records = self
            .store
            .intake_since(Some(&key.medication_id), intake::lookup_window_start(key.day))?;
        Ok(intake::current_status(&medication, key, &records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badge::InMemoryBadge;
    use crate::clock::FixedClock;
    use crate::delivery::InMemoryDeliveryService;
    use crate::models::TimeSlot;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn slot(h: u32, m: u32) -> TimeSlot {
        TimeSlot::new(h, m).unwrap()
    }

    struct Fixture {
        state: CoreState,
        store: MemoryStore,
        delivery: Arc<InMemoryDeliveryService>,
        clock: Arc<FixedClock>,
        badge: Arc<InMemoryBadge>,
    }

    fn fixture(now: NaiveDateTime) -> Fixture {
        let store = MemoryStore::new();
        let delivery = Arc::new(InMemoryDeliveryService::new());
        let clock = Arc::new(FixedClock::new(now));
        let badge = Arc::new(InMemoryBadge::new());
        let state = CoreState::new(
            Box::new(store.clone()),
            delivery.clone(),
            clock.clone(),
            badge.clone(),
            ReminderConfig::default(),
        )
        .unwrap();
        Fixture {
            state,
            store,
            delivery,
            clock,
            badge,
        }
    }

    fn metformin() -> MedicationSchedule {
        MedicationSchedule::new("metformin", "Metformin", "500mg", vec![slot(8, 0), slot(20, 0)])
    }

    #[tokio::test]
    async fn save_medication_installs_triggers_and_badge() {
        let mut f = fixture(at(10, 8, 45));
        f.state.save_medication(&metformin()).await.unwrap();

        assert_eq!(
            f.delivery.pending_ids(),
            vec!["metformin_20250110_20_00", "metformin_20250111_08_00"]
        );
        assert_eq!(f.badge.count(), 1);
    }

    #[tokio::test]
    async fn delete_medication_cancels_everything() {
        let mut f = fixture(at(10, 7, 0));
        f.state.save_medication(&metformin()).await.unwrap();
        assert!(f.state.delete_medication("metformin").await.unwrap());
        assert!(f.delivery.pending_ids().is_empty());
        assert!(!f.state.delete_medication("metformin").await.unwrap());
    }

    #[tokio::test]
    async fn failed_enqueue_is_retried_on_activation() {
        let mut f = fixture(at(10, 7, 0));
        f.delivery.reject_enqueue_of("metformin_");
        let report = f.state.save_medication(&metformin()).await.unwrap();
        assert!(!report.is_clean());
        assert_eq!(f.state.needs_resync().collect::<Vec<_>>(), vec!["metformin"]);

        f.delivery.accept_all();
        f.state.app_became_active().await.unwrap();
        assert_eq!(f.state.needs_resync().count(), 0);
        assert_eq!(f.delivery.pending_ids().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_pending_list_surfaces_on_schedule_change() {
        let mut f = fixture(at(10, 7, 0));
        f.delivery.set_offline(true);
        let err = f.state.save_medication(&metformin()).await.unwrap_err();
        assert!(matches!(err, ReminderError::Delivery(_)));
        // The schedule itself was written.
        assert!(f.store.get_medication("metformin").unwrap().is_some());
    }

    #[tokio::test]
    async fn activation_cancels_orphaned_triggers() {
        let mut f = fixture(at(10, 7, 0));
        f.state.save_medication(&metformin()).await.unwrap();
        let mut writer = f.store.clone();
        writer.delete_medication("metformin").unwrap();

        f.state.app_became_active().await.unwrap();
        assert!(f.delivery.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn suppression_survives_restart_within_the_day() {
        let mut f = fixture(at(10, 8, 5));
        let key = OccurrenceKey::new("metformin", at(10, 0, 0).date(), slot(8, 0));
        f.state.mark_suppressed(&key);

        let mut restarted = CoreState::new(
            Box::new(f.store.clone()),
            f.delivery.clone(),
            f.clock.clone(),
            f.badge.clone(),
            ReminderConfig::default(),
        )
        .unwrap();
        assert!(!restarted.will_present("metformin_20250110_08_00"));

        f.clock.advance(Duration::days(1));
        assert!(restarted.will_present("metformin_20250110_08_00"));
        assert!(f.store.load_suppression().unwrap().is_empty());
    }
}
