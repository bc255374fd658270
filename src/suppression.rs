//! Day-scoped suppression of already-resolved occurrences.
//!
//! When the user resolves an occurrence directly, its trigger may still
//! fire if the cancel raced with delivery. The presentation path asks
//! [`SuppressionCache::is_suppressed`] before showing anything. The set
//! belongs to one calendar day and is discarded as soon as the day rolls.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::occurrence::{OccurrenceKey, TriggerKey};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionCache {
    day: Option<NaiveDate>,
    keys: BTreeSet<String>,
}

impl SuppressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts.
    pub fn from_parts(day: Option<NaiveDate>, keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            day,
            keys: keys.into_iter().collect(),
        }
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Drop the set if it belongs to another day. Returns true if it did.
    pub fn normalize(&mut self, today: NaiveDate) -> bool {
        if self.day == Some(today) {
            return false;
        }
        let discarded = !self.keys.is_empty();
        if discarded {
            tracing::debug!(stale_day = ?self.day, count = self.keys.len(), "Discarding suppression set from previous day");
        }
        self.keys.clear();
        self.day = Some(today);
        discarded
    }

    /// Record `key` as resolved today, together with its legacy twin when
    /// the occurrence is today's.
    pub fn mark_suppressed_today(&mut self, key: &OccurrenceKey, today: NaiveDate) {
        self.normalize(today);
        self.keys.insert(key.encode());
        // A day-less id always means "today"; yesterday's occurrence must
        // not silence today's trigger for the same slot.
        if key.day == today {
            self.keys.insert(key.legacy());
        }
    }

    /// Whether a trigger with this identifier should be kept off screen.
    pub fn is_suppressed(&self, trigger_id: &str, today: NaiveDate) -> bool {
        if self.day != Some(today) {
            return false;
        }
        if self.keys.contains(trigger_id) {
            return true;
        }
        match TriggerKey::decode(trigger_id) {
            TriggerKey::Unrecognized { .. } | TriggerKey::Snooze { slot: None, .. } => false,
            decoded => decoded
                .occurrence(today)
                .is_some_and(|key| self.contains_occurrence(&key, today)),
        }
    }

    /// Whether `key` was resolved by a direct action today.
    pub fn is_resolved(&self, key: &OccurrenceKey, today: NaiveDate) -> bool {
        self.day == Some(today) && self.keys.contains(&key.encode())
    }

    fn contains_occurrence(&self, key: &OccurrenceKey, today: NaiveDate) -> bool {
        self.keys.contains(&key.encode()) || (key.day == today && self.keys.contains(&key.legacy()))
    }
}
