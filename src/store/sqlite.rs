use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ReminderStore, StoreError};
use crate::models::{IntakeRecord, IntakeStatus, MedicationSchedule, TimeSlot};
use crate::suppression::SuppressionCache;

/// Fixed width, so lexical order in SQLite matches chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// Schema steps in ascending order. Each runs once, inside its own
/// transaction, and records itself in `schema_version`.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../resources/migrations/001_initial.sql"))];

/// Open (or create) the reminder database at `path` and bring its
/// schedules, intake history and suppression tables up to date.
pub fn open_database(path: &Path) -> Result<Connection, StoreError> {
    prepare(Connection::open(path)?)
}

/// Same schema on a throwaway connection; nothing survives the handle.
pub fn open_memory_database() -> Result<Connection, StoreError> {
    prepare(Connection::open_in_memory()?)
}

fn prepare(conn: Connection) -> Result<Connection, StoreError> {
    conn.execute_batch("PRAGMA journal_mode = DELETE;")?;
    migrate(&conn)?;
    Ok(conn)
}

/// Apply every step newer than the stored schema version.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let applied = schema_version(conn)?;
    for &(version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > applied) {
        tracing::info!(from = applied, to = version, "Migrating reminder schema");
        let failed = |e: rusqlite::Error| StoreError::MigrationFailed {
            version,
            reason: e.to_string(),
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(sql).map_err(failed)?;
        tx.commit().map_err(failed)?;
    }
    Ok(())
}

/// Highest applied step; 0 for a database that has never been migrated.
fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    let tracked: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !tracked {
        return Ok(0);
    }
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// SQLite-backed schedule and intake store.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(open_database(path)?))
    }

    /// Open the store at `config::database_path()`, creating the directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = crate::config::database_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "Opening reminder database");
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(open_memory_database()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

struct MedicationRow {
    id: String,
    name: String,
    dose: String,
    time_slots: String,
    enabled: bool,
}

fn medication_from_row(row: MedicationRow) -> Result<MedicationSchedule, StoreError> {
    let slots: Vec<TimeSlot> =
        serde_json::from_str(&row.time_slots).map_err(|_| StoreError::InvalidValue {
            field: "time_slots".into(),
            value: row.time_slots.clone(),
        })?;
    Ok(MedicationSchedule {
        id: row.id,
        name: row.name,
        dose: row.dose,
        slots,
        enabled: row.enabled,
    })
}

struct IntakeRow {
    id: String,
    medication_id: String,
    recorded_at: String,
    status: String,
    slot_key: Option<String>,
}

fn intake_from_row(row: IntakeRow) -> Result<IntakeRecord, StoreError> {
    let recorded_at = NaiveDateTime::parse_from_str(&row.recorded_at, TIMESTAMP_FORMAT).map_err(
        |_| StoreError::InvalidValue {
            field: "recorded_at".into(),
            value: row.recorded_at.clone(),
        },
    )?;
    Ok(IntakeRecord {
        id: Uuid::parse_str(&row.id).map_err(|_| StoreError::InvalidValue {
            field: "id".into(),
            value: row.id.clone(),
        })?,
        medication_id: row.medication_id,
        recorded_at,
        status: IntakeStatus::from_str(&row.status)?,
        slot_key: row.slot_key,
    })
}

impl ReminderStore for SqliteStore {
    fn list_medications(&self) -> Result<Vec<MedicationSchedule>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, dose, time_slots, enabled
             FROM medication_schedules ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MedicationRow {
                id: row.get(0)?,
                name: row.get(1)?,
                dose: row.get(2)?,
                time_slots: row.get(3)?,
                enabled: row.get::<_, i32>(4)? != 0,
            })
        })?;

        let mut meds = Vec::new();
        for row in rows {
            meds.push(medication_from_row(row?)?);
        }
        Ok(meds)
    }

    fn get_medication(&self, id: &str) -> Result<Option<MedicationSchedule>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, dose, time_slots, enabled
                 FROM medication_schedules WHERE id = ?1",
                params![id],
                |row| {
                    Ok(MedicationRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        dose: row.get(2)?,
                        time_slots: row.get(3)?,
                        enabled: row.get::<_, i32>(4)? != 0,
                    })
                },
            )
            .optional()?;
        row.map(medication_from_row).transpose()
    }

    fn save_medication(&mut self, medication: &MedicationSchedule) -> Result<(), StoreError> {
        let slots = serde_json::to_string(&medication.slots).map_err(|e| StoreError::InvalidValue {
            field: "time_slots".into(),
            value: e.to_string(),
        })?;
        self.conn.execute(
            "INSERT INTO medication_schedules (id, name, dose, time_slots, enabled, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                dose = excluded.dose,
                time_slots = excluded.time_slots,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![
                medication.id,
                medication.name,
                medication.dose,
                slots,
                medication.enabled as i32,
            ],
        )?;
        Ok(())
    }

    fn delete_medication(&mut self, id: &str) -> Result<bool, StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM medication_schedules WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn append_intake(&mut self, record: &IntakeRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO intake_records (id, medication_id, recorded_at, status, slot_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id.to_string(),
                record.medication_id,
                record.recorded_at.format(TIMESTAMP_FORMAT).to_string(),
                record.status.as_str(),
                record.slot_key,
            ],
        )?;
        Ok(())
    }

    fn intake_since(
        &self,
        medication_id: Option<&str>,
        since: NaiveDateTime,
    ) -> Result<Vec<IntakeRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, medication_id, recorded_at, status, slot_key
             FROM intake_records
             WHERE recorded_at >= ?1 AND (?2 IS NULL OR medication_id = ?2)
             ORDER BY recorded_at ASC, seq ASC",
        )?;
        let rows = stmt.query_map(
            params![since.format(TIMESTAMP_FORMAT).to_string(), medication_id],
            |row| {
                Ok(IntakeRow {
                    id: row.get(0)?,
                    medication_id: row.get(1)?,
                    recorded_at: row.get(2)?,
                    status: row.get(3)?,
                    slot_key: row.get(4)?,
                })
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            records.push(intake_from_row(row?)?);
        }
        Ok(records)
    }

    fn load_suppression(&self) -> Result<SuppressionCache, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT day, occurrence_key FROM suppressed_occurrences ORDER BY day DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut day: Option<NaiveDate> = None;
        let mut keys = Vec::new();
        for row in rows {
            let (row_day, key) = row?;
            let parsed = NaiveDate::parse_from_str(&row_day, DAY_FORMAT).map_err(|_| {
                StoreError::InvalidValue {
                    field: "suppressed_occurrences.day".into(),
                    value: row_day.clone(),
                }
            })?;
            // Only the newest day is meaningful; older rows are leftovers.
            match day {
                None => day = Some(parsed),
                Some(current) if current != parsed => continue,
                Some(_) => {}
            }
            keys.push(key);
        }
        Ok(SuppressionCache::from_parts(day, keys))
    }

    fn save_suppression(&mut self, cache: &SuppressionCache) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM suppressed_occurrences", [])?;
        if let Some(day) = cache.day() {
            let day = day.format(DAY_FORMAT).to_string();
            let mut stmt = tx.prepare(
                "INSERT INTO suppressed_occurrences (day, occurrence_key) VALUES (?1, ?2)",
            )?;
            for key in cache.keys() {
                stmt.execute(params![day, key])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
