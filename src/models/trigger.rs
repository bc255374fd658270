use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::medication::{MedicationSchedule, TimeSlot};

const PAYLOAD_DAY_FORMAT: &str = "%Y-%m-%d";

/// Data attached to a trigger and handed back on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub medication_id: String,
    #[serde(default)]
    pub medication_name: String,
    #[serde(default)]
    pub dose: String,
    #[serde(default)]
    pub slot: Option<TimeSlot>,
    #[serde(default)]
    pub day: Option<NaiveDate>,
}

impl TriggerPayload {
    pub fn for_medication(medication: &MedicationSchedule) -> Self {
        Self {
            medication_id: medication.id.clone(),
            medication_name: medication.name.clone(),
            dose: medication.dose.clone(),
            slot: None,
            day: None,
        }
    }

    pub fn with_occurrence(mut self, slot: Option<TimeSlot>, day: Option<NaiveDate>) -> Self {
        self.slot = slot;
        self.day = day;
        self
    }

    /// Flatten into the string map most notification hosts carry.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("medication_id".into(), self.medication_id.clone());
        map.insert("medication_name".into(), self.medication_name.clone());
        map.insert("dose".into(), self.dose.clone());
        if let Some(slot) = self.slot {
            map.insert("slot".into(), slot.to_string());
        }
        if let Some(day) = self.day {
            map.insert("day".into(), day.format(PAYLOAD_DAY_FORMAT).to_string());
        }
        map
    }

    /// Best-effort read of a host string map. Malformed `slot`/`day`
    /// entries are dropped rather than failing the whole payload.
    pub fn from_map(map: &HashMap<String, String>) -> Option<Self> {
        let medication_id = map.get("medication_id").filter(|id| !id.is_empty())?.clone();
        Some(Self {
            medication_id,
            medication_name: map.get("medication_name").cloned().unwrap_or_default(),
            dose: map.get("dose").cloned().unwrap_or_default(),
            slot: map.get("slot").and_then(|s| TimeSlot::parse(s).ok()),
            day: map
                .get("day")
                .and_then(|d| NaiveDate::parse_from_str(d, PAYLOAD_DAY_FORMAT).ok()),
        })
    }
}

/// A one-shot trigger held by the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTrigger {
    pub id: String,
    pub fire_at: NaiveDateTime,
    pub payload: TriggerPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_map_round_trip_keeps_occurrence() {
        let med = MedicationSchedule::new("abc123", "Metformin", "500mg", vec![]);
        let payload = TriggerPayload::for_medication(&med).with_occurrence(
            Some(TimeSlot::new(8, 30).unwrap()),
            NaiveDate::from_ymd_opt(2025, 1, 31),
        );
        let map = payload.to_map();
        assert_eq!(map["slot"], "08:30");
        assert_eq!(map["day"], "2025-01-31");
        assert_eq!(TriggerPayload::from_map(&map), Some(payload));
    }

    #[test]
    fn malformed_map_fields_are_dropped() {
        let mut map = HashMap::new();
        map.insert("medication_id".to_string(), "abc123".to_string());
        map.insert("slot".to_string(), "8h30".to_string());
        map.insert("day".to_string(), "yesterday".to_string());

        let payload = TriggerPayload::from_map(&map).unwrap();
        assert_eq!(payload.medication_id, "abc123");
        assert_eq!(payload.slot, None);
        assert_eq!(payload.day, None);
    }

    #[test]
    fn map_without_medication_is_rejected() {
        assert_eq!(TriggerPayload::from_map(&HashMap::new()), None);
    }
}
