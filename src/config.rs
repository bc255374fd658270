use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "Dosekeeper";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const GRACE_MINUTES_ENV: &str = "DOSEKEEPER_GRACE_MINUTES";
pub const SNOOZE_MINUTES_ENV: &str = "DOSEKEEPER_SNOOZE_MINUTES";
pub const COMMAND_BUFFER_ENV: &str = "DOSEKEEPER_COMMAND_BUFFER";

/// A grace window longer than a day would push slots into tomorrow.
pub const GRACE_MINUTES_RANGE: std::ops::RangeInclusive<i64> = 0..=1440;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "dosekeeper=debug,info"
    } else {
        "dosekeeper=info,warn"
    }
}

/// Get the application data directory: ~/Dosekeeper/.
/// Falls back to the working directory when no home is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the SQLite store.
pub fn database_path() -> PathBuf {
    app_data_dir().join("reminders.db")
}

/// Runtime knobs of the reminder engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Minutes after a slot's instant before it counts as outstanding.
    pub grace_minutes: i64,
    /// Snooze length when the action id carries none.
    pub default_snooze_minutes: u32,
    /// Capacity of the engine's command channel.
    pub command_buffer: usize,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            grace_minutes: 30,
            default_snooze_minutes: 10,
            command_buffer: 64,
        }
    }
}

impl ReminderConfig {
    /// Defaults overlaid with `DOSEKEEPER_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_var::<i64>(&lookup, GRACE_MINUTES_ENV) {
            if GRACE_MINUTES_RANGE.contains(&v) {
                self.grace_minutes = v;
            } else {
                tracing::warn!(
                    variable = GRACE_MINUTES_ENV,
                    value = v,
                    "Ignoring grace window outside 0..=1440 minutes"
                );
            }
        }
        if let Some(v) = parse_var(&lookup, SNOOZE_MINUTES_ENV) {
            self.default_snooze_minutes = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, COMMAND_BUFFER_ENV) {
            // tokio channels panic on zero capacity
            self.command_buffer = v.max(1);
        }
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Ignoring malformed configuration value");
            None
        }
    }
}
