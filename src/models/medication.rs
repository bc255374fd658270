use std::collections::BTreeSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::ReminderError;

/// A daily time of day at which a medication is due.
///
/// Serialised as `"HH:MM"` so stored schedules stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot {
    hour: u8,
    minute: u8,
}

impl TimeSlot {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ReminderError> {
        if hour > 23 || minute > 59 {
            return Err(ReminderError::InvalidTimeSlot(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    /// Parse `"HH:MM"` (single-digit hours accepted).
    pub fn parse(value: &str) -> Result<Self, ReminderError> {
        let invalid = || ReminderError::InvalidTimeSlot(value.to_string());
        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub fn hour(&self) -> u32 {
        self.hour.into()
    }

    pub fn minute(&self) -> u32 {
        self.minute.into()
    }

    pub fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }

    /// Wall-clock instant of this slot on `day`.
    pub fn on(&self, day: NaiveDate) -> NaiveDateTime {
        day.and_time(self.time())
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = ReminderError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

/// A medication and the daily slots it is reminded at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationSchedule {
    pub id: String,
    pub name: String,
    pub dose: String,
    pub slots: Vec<TimeSlot>,
    pub enabled: bool,
}

impl MedicationSchedule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dose: impl Into<String>,
        slots: Vec<TimeSlot>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            dose: dose.into(),
            slots,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Distinct slots in chronological order. Duplicate slots collapse
    /// to one occurrence since they share an occurrence key.
    pub fn unique_slots(&self) -> Vec<TimeSlot> {
        self.slots.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn has_slot(&self, slot: TimeSlot) -> bool {
        self.slots.contains(&slot)
    }

    /// The only slot, when the medication has exactly one distinct slot.
    /// Unslotted intake records fall back to it.
    pub fn single_slot(&self) -> Option<TimeSlot> {
        match self.unique_slots().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}
