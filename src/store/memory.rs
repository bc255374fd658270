//! Vec/BTreeMap-backed store for tests and for hosts that persist
//! schedules themselves. Clones share the same data, so a caller can keep
//! a handle after moving one into the engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;

use super::{ReminderStore, StoreError};
use crate::models::{IntakeRecord, MedicationSchedule};
use crate::suppression::SuppressionCache;

#[derive(Default)]
struct MemoryData {
    medications: BTreeMap<String, MedicationSchedule>,
    intake: Vec<IntakeRecord>,
    suppression: SuppressionCache,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<MemoryData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_medications(medications: impl IntoIterator<Item = MedicationSchedule>) -> Self {
        let store = Self::new();
        if let Ok(mut data) = store.data.lock() {
            for med in medications {
                data.medications.insert(med.id.clone(), med);
            }
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryData>, StoreError> {
        self.data.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Full intake history in append order.
    pub fn intake_records(&self) -> Vec<IntakeRecord> {
        self.lock().map(|data| data.intake.clone()).unwrap_or_default()
    }
}

impl ReminderStore for MemoryStore {
    fn list_medications(&self) -> Result<Vec<MedicationSchedule>, StoreError> {
        Ok(self.lock()?.medications.values().cloned().collect())
    }

    fn get_medication(&self, id: &str) -> Result<Option<MedicationSchedule>, StoreError> {
        Ok(self.lock()?.medications.get(id).cloned())
    }

    fn save_medication(&mut self, medication: &MedicationSchedule) -> Result<(), StoreError> {
        self.lock()?
            .medications
            .insert(medication.id.clone(), medication.clone());
        Ok(())
    }

    fn delete_medication(&mut self, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.medications.remove(id).is_some())
    }

    fn append_intake(&mut self, record: &IntakeRecord) -> Result<(), StoreError> {
        self.lock()?.intake.push(record.clone());
        Ok(())
    }

    fn intake_since(
        &self,
        medication_id: Option<&str>,
        since: NaiveDateTime,
    ) -> Result<Vec<IntakeRecord>, StoreError> {
        let data = self.lock()?;
        let mut records: Vec<IntakeRecord> = data
            .intake
            .iter()
            .filter(|r| r.recorded_at >= since)
            .filter(|r| medication_id.map_or(true, |id| r.medication_id == id))
            .cloned()
            .collect();
        // Stable sort keeps append order on equal timestamps.
        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }

    fn load_suppression(&self) -> Result<SuppressionCache, StoreError> {
        Ok(self.lock()?.suppression.clone())
    }

    fn save_suppression(&mut self, cache: &SuppressionCache) -> Result<(), StoreError> {
        self.lock()?.suppression = cache.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntakeStatus, TimeSlot};
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 10)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn clones_share_data() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer
            .save_medication(&MedicationSchedule::new(
                "m1",
                "Lisinopril",
                "10mg",
                vec![TimeSlot::new(9, 0).unwrap()],
            ))
            .unwrap();
        assert_eq!(store.list_medications().unwrap().len(), 1);
    }

    #[test]
    fn intake_since_sorts_by_time_keeping_ties_in_append_order() {
        let mut store = MemoryStore::new();
        let late = IntakeRecord::new("m1", IntakeStatus::Taken, None, at(10));
        let tie_a = IntakeRecord::new("m1", IntakeStatus::Snoozed, None, at(9));
        let tie_b = IntakeRecord::new("m1", IntakeStatus::Skipped, None, at(9));
        let old = IntakeRecord::new("m1", IntakeStatus::Taken, None, at(5));
        for r in [&late, &tie_a, &tie_b, &old] {
            store.append_intake(r).unwrap();
        }

        let records = store.intake_since(Some("m1"), at(6)).unwrap();
        assert_eq!(records, vec![tie_a, tie_b, late]);
        assert_eq!(store.intake_records().len(), 4);
    }
}
