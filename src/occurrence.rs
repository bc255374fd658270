//! Occurrence keys and trigger identifiers.
//!
//! An occurrence is one (medication, calendar day, slot) instance. Its key
//! doubles as the delivery-service trigger identifier and as the explicit
//! slot key stored on intake records. Four identifier shapes exist in the
//! wild and must keep decoding:
//!
//! ```text
//! <medication>_<yyyymmdd>_<HH>_<MM>   current
//! <medication>_<HH>_<MM>              legacy, no day (means "today")
//! snooze_<medication>_<HH>_<MM>       slot-level snooze
//! snooze_<medication>                 medication-level snooze (oldest)
//! ```
//!
//! Decoding splits from the right, so medication ids that themselves
//! contain `_` survive. Decoding never fails: an identifier that matches
//! no shape decodes as [`TriggerKey::Unrecognized`] and callers fall back
//! to medication-level handling.

use chrono::NaiveDate;

use crate::models::TimeSlot;

pub const SNOOZE_PREFIX: &str = "snooze_";

const DAY_FORMAT: &str = "%Y%m%d";

/// Current-format occurrence identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccurrenceKey {
    pub medication_id: String,
    pub day: NaiveDate,
    pub slot: TimeSlot,
}

impl OccurrenceKey {
    pub fn new(medication_id: impl Into<String>, day: NaiveDate, slot: TimeSlot) -> Self {
        Self {
            medication_id: medication_id.into(),
            day,
            slot,
        }
    }

    /// `<medication>_<yyyymmdd>_<HH>_<MM>`
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{:02}_{:02}",
            self.medication_id,
            self.day.format(DAY_FORMAT),
            self.slot.hour(),
            self.slot.minute()
        )
    }

    /// The day-less identifier older builds used for the same slot.
    pub fn legacy(&self) -> String {
        legacy_id(&self.medication_id, self.slot)
    }

    pub fn snooze_id(&self) -> String {
        snooze_id(&self.medication_id, Some(self.slot))
    }
}

impl std::fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

/// `<medication>_<HH>_<MM>`
pub fn legacy_id(medication_id: &str, slot: TimeSlot) -> String {
    format!("{}_{:02}_{:02}", medication_id, slot.hour(), slot.minute())
}

/// `snooze_<medication>_<HH>_<MM>`, or `snooze_<medication>` without a slot.
pub fn snooze_id(medication_id: &str, slot: Option<TimeSlot>) -> String {
    match slot {
        Some(slot) => format!("{SNOOZE_PREFIX}{}", legacy_id(medication_id, slot)),
        None => format!("{SNOOZE_PREFIX}{medication_id}"),
    }
}

/// Prefix shared by every base (non-snooze) trigger of a medication.
pub fn base_prefix(medication_id: &str) -> String {
    format!("{medication_id}_")
}

/// Prefix shared by every snooze trigger of a medication.
pub fn snooze_prefix(medication_id: &str) -> String {
    format!("{SNOOZE_PREFIX}{medication_id}")
}

/// Typed result of decoding a trigger identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKey {
    Occurrence(OccurrenceKey),
    /// Day-less identifier; the day is either "today" or unparseable.
    Legacy { medication_id: String, slot: TimeSlot },
    /// `slot` is `None` for the medication-level snooze shape.
    Snooze {
        medication_id: String,
        slot: Option<TimeSlot>,
    },
    Unrecognized { medication_id: String },
}

impl TriggerKey {
    /// Try each known shape in order: snooze, current, legacy.
    pub fn decode(id: &str) -> Self {
        if let Some(rest) = id.strip_prefix(SNOOZE_PREFIX).filter(|rest| !rest.is_empty()) {
            return match split_slot(rest) {
                Some((medication_id, slot)) => Self::Snooze {
                    medication_id: medication_id.to_string(),
                    slot: Some(slot),
                },
                None => Self::Snooze {
                    medication_id: rest.to_string(),
                    slot: None,
                },
            };
        }

        let Some((head, slot)) = split_slot(id) else {
            return Self::Unrecognized {
                medication_id: id.to_string(),
            };
        };

        if let Some((medication_id, stamp)) = head.rsplit_once('_') {
            if !medication_id.is_empty() && is_day_stamp(stamp) {
                return match NaiveDate::parse_from_str(stamp, DAY_FORMAT) {
                    Ok(day) => Self::Occurrence(OccurrenceKey::new(medication_id, day, slot)),
                    // Not a date: the digits belong to the medication id.
                    Err(_) => Self::Legacy {
                        medication_id: head.to_string(),
                        slot,
                    },
                };
            }
        }

        Self::Legacy {
            medication_id: head.to_string(),
            slot,
        }
    }

    pub fn medication_id(&self) -> &str {
        match self {
            Self::Occurrence(key) => &key.medication_id,
            Self::Legacy { medication_id, .. }
            | Self::Snooze { medication_id, .. }
            | Self::Unrecognized { medication_id } => medication_id,
        }
    }

    pub fn day(&self) -> Option<NaiveDate> {
        match self {
            Self::Occurrence(key) => Some(key.day),
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<TimeSlot> {
        match self {
            Self::Occurrence(key) => Some(key.slot),
            Self::Legacy { slot, .. } => Some(*slot),
            Self::Snooze { slot, .. } => *slot,
            Self::Unrecognized { .. } => None,
        }
    }

    pub fn is_snooze(&self) -> bool {
        matches!(self, Self::Snooze { .. })
    }

    /// Base (non-snooze) trigger belonging to `medication_id`.
    pub fn is_base_of(&self, medication_id: &str) -> bool {
        matches!(self, Self::Occurrence(_) | Self::Legacy { .. })
            && self.medication_id() == medication_id
    }

    /// Full occurrence key, with day-less shapes resolved against `today`.
    pub fn occurrence(&self, today: NaiveDate) -> Option<OccurrenceKey> {
        let slot = self.slot()?;
        Some(OccurrenceKey::new(
            self.medication_id(),
            self.day().unwrap_or(today),
            slot,
        ))
    }
}

/// Split a trailing `_HH_MM` off `value`.
fn split_slot(value: &str) -> Option<(&str, TimeSlot)> {
    let (rest, minute) = value.rsplit_once('_')?;
    let (head, hour) = rest.rsplit_once('_')?;
    if head.is_empty() {
        return None;
    }
    let slot = TimeSlot::new(two_digits(hour)?, two_digits(minute)?).ok()?;
    Some((head, slot))
}

fn two_digits(value: &str) -> Option<u32> {
    if value.len() == 2 && value.bytes().all(|b| b.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

pub(crate) fn is_day_stamp(value: &str) -> bool {
    value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit())
}
