//! Trigger registry: list / cancel / enqueue orchestration over the
//! delivery service.
//!
//! Holds no state of its own. `resync` is a full recompute (cancel every
//! base trigger of the medication, then enqueue the next occurrence of
//! each slot), so calling it again always converges to the same pending
//! set. Individual enqueue/cancel failures are logged and collected in
//! the returned [`SyncReport`]; the next resync heals them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::{DeliveryError, DeliveryService};
use crate::models::{MedicationSchedule, PendingTrigger, TimeSlot, TriggerPayload};
use crate::occurrence::{self, OccurrenceKey, TriggerKey};
use crate::planner;
use crate::suppression::SuppressionCache;

/// What one registry operation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub cancelled: Vec<String>,
    pub enqueued: Vec<String>,
    pub failures: Vec<DeliveryError>,
}

impl SyncReport {
    /// No enqueue or cancel was refused.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.cancelled.extend(other.cancelled);
        self.enqueued.extend(other.enqueued);
        self.failures.extend(other.failures);
    }

    pub fn failed(error: DeliveryError) -> Self {
        Self {
            failures: vec![error],
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct TriggerRegistry {
    service: Arc<dyn DeliveryService>,
}

impl TriggerRegistry {
    pub fn new(service: Arc<dyn DeliveryService>) -> Self {
        Self { service }
    }

    /// Replace every base trigger of `medication` with the next occurrence
    /// of each slot. Snooze triggers are left alone.
    ///
    /// Fails only when the pending list itself cannot be read.
    pub async fn resync(
        &self,
        medication: &MedicationSchedule,
        now: NaiveDateTime,
        suppression: &SuppressionCache,
    ) -> Result<SyncReport, DeliveryError> {
        let stale: Vec<String> = self
            .service
            .list_pending(&occurrence::base_prefix(&medication.id))
            .await?
            .into_iter()
            .filter(|t| TriggerKey::decode(&t.id).is_base_of(&medication.id))
            .map(|t| t.id)
            .collect();

        let mut report = self.cancel_ids(stale).await;

        let today = now.date();
        let plan = planner::plan_medication(medication, now, |key| suppression.is_resolved(key, today));
        for trigger in plan {
            report.merge(self.enqueue(trigger).await);
        }

        tracing::debug!(
            medication_id = %medication.id,
            cancelled = report.cancelled.len(),
            enqueued = report.enqueued.len(),
            failures = report.failures.len(),
            "Resynced medication triggers"
        );
        Ok(report)
    }

    /// Cancel the pending trigger(s) of one occurrence: its current id,
    /// its legacy twin and its slot snooze. Only ids that are still
    /// pending are cancelled, so a second resolution cancels nothing.
    pub async fn cancel_occurrence(&self, key: &OccurrenceKey) -> Result<SyncReport, DeliveryError> {
        let candidates: HashSet<String> = [key.encode(), key.legacy(), key.snooze_id()].into();

        let mut pending = self
            .service
            .list_pending(&occurrence::base_prefix(&key.medication_id))
            .await?;
        pending.extend(
            self.service
                .list_pending(&occurrence::snooze_prefix(&key.medication_id))
                .await?,
        );

        let ids: Vec<String> = pending
            .into_iter()
            .map(|t| t.id)
            .filter(|id| candidates.contains(id))
            .collect();

        if ids.is_empty() {
            tracing::debug!(occurrence = %key, "No pending trigger left for occurrence");
        }
        Ok(self.cancel_ids(ids).await)
    }

    /// Install a snooze for `(medication, slot)`, first removing any live
    /// snooze for the same pair. A slot-level snooze also replaces a
    /// medication-level one; a medication-level snooze only replaces
    /// another medication-level one.
    pub async fn schedule_snooze(
        &self,
        medication: &MedicationSchedule,
        minutes: u32,
        slot: Option<TimeSlot>,
        day: Option<NaiveDate>,
        now: NaiveDateTime,
    ) -> Result<SyncReport, DeliveryError> {
        let stale: Vec<String> = self
            .service
            .list_pending(&occurrence::snooze_prefix(&medication.id))
            .await?
            .into_iter()
            .filter(|t| match TriggerKey::decode(&t.id) {
                TriggerKey::Snooze {
                    medication_id,
                    slot: pending_slot,
                } => medication_id == medication.id && (pending_slot == slot || pending_slot.is_none()),
                _ => false,
            })
            .map(|t| t.id)
            .collect();

        let mut report = self.cancel_ids(stale).await;

        let trigger = PendingTrigger {
            id: occurrence::snooze_id(&medication.id, slot),
            fire_at: now + Duration::minutes(i64::from(minutes)),
            payload: TriggerPayload::for_medication(medication).with_occurrence(slot, day),
        };
        report.merge(self.enqueue(trigger).await);
        Ok(report)
    }

    /// Cancel every base and snooze trigger of a medication.
    pub async fn cancel_medication(&self, medication_id: &str) -> Result<SyncReport, DeliveryError> {
        let mut pending = self
            .service
            .list_pending(&occurrence::base_prefix(medication_id))
            .await?;
        pending.extend(
            self.service
                .list_pending(&occurrence::snooze_prefix(medication_id))
                .await?,
        );

        let ids: Vec<String> = pending
            .into_iter()
            .map(|t| t.id)
            .filter(|id| TriggerKey::decode(id).medication_id() == medication_id)
            .collect();
        Ok(self.cancel_ids(ids).await)
    }

    /// Cancel reminder triggers whose medication is not in `known`.
    /// Pending ids that are not reminder identifiers belong to the host
    /// and are left alone.
    pub async fn cancel_orphans(&self, known: &HashSet<String>) -> Result<SyncReport, DeliveryError> {
        let ids: Vec<String> = self
            .service
            .list_pending("")
            .await?
            .into_iter()
            .map(|t| t.id)
            .filter(|id| match TriggerKey::decode(id) {
                TriggerKey::Unrecognized { .. } => false,
                decoded => !known.contains(decoded.medication_id()),
            })
            .collect();

        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Cancelling triggers of removed medications");
        }
        Ok(self.cancel_ids(ids).await)
    }

    async fn cancel_ids(&self, ids: Vec<String>) -> SyncReport {
        if ids.is_empty() {
            return SyncReport::default();
        }
        match self.service.cancel(&ids).await {
            Ok(()) => SyncReport {
                cancelled: ids,
                ..SyncReport::default()
            },
            Err(e) => {
                tracing::warn!(error = %e, count = ids.len(), "Cancelling triggers failed");
                SyncReport::failed(e)
            }
        }
    }

    async fn enqueue(&self, trigger: PendingTrigger) -> SyncReport {
        let id = trigger.id.clone();
        match self.service.enqueue(trigger).await {
            Ok(()) => SyncReport {
                enqueued: vec![id],
                ..SyncReport::default()
            },
            Err(e) => {
                tracing::warn!(trigger_id = %id, error = %e, "Enqueueing trigger failed");
                SyncReport::failed(e)
            }
        }
    }
}
