use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::types::RawField;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workflows (
        workflow_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        trigger_type TEXT NOT NULL DEFAULT 'manual',
        trigger_config TEXT NOT NULL DEFAULT '{}',
        nodes TEXT NOT NULL DEFAULT '[]',
        variables TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'draft',
        max_runs_per_hour INTEGER NOT NULL DEFAULT 10,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        tags TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS workflow_runs (
        run_id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        current_node TEXT NOT NULL DEFAULT '',
        context TEXT NOT NULL DEFAULT '{}',
        loop_cursors TEXT NOT NULL DEFAULT '{}',
        steps_log TEXT NOT NULL DEFAULT '[]',
        trigger_data TEXT NOT NULL DEFAULT '{}',
        started_at TEXT NOT NULL,
        completed_at TEXT,
        resume_at TEXT,
        error TEXT
    );

    CREATE TABLE IF NOT EXISTS workflow_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id TEXT NOT NULL,
        run_id TEXT,
        event_type TEXT NOT NULL,
        node_id TEXT,
        details TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_runs_workflow ON workflow_runs(workflow_id, started_at);
    CREATE INDEX IF NOT EXISTS idx_runs_status ON workflow_runs(status);
    CREATE INDEX IF NOT EXISTS idx_audit_workflow ON workflow_audit_log(workflow_id);
    CREATE INDEX IF NOT EXISTS idx_audit_run ON workflow_audit_log(run_id);";

/// SQLite-backed store for workflow definitions, runs, and the audit trail.
///
/// Composite fields (nodes, context, step log, ...) are stored as JSON text.
/// Readers never fail on a column that does not decode: the typed field is
/// left at its default and the raw text is attached as a [`RawField`].
///
/// No row-level locking is done. Callers serialize `save_run` per run id.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    WeftError::Database(format!("Failed to create db directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> WeftError {
    WeftError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so text comparison orders correctly.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            warn!(raw = %raw, "Unparseable timestamp in store");
            DateTime::<Utc>::UNIX_EPOCH
        })
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON column, recording the raw text instead of failing.
pub(crate) fn decode_json<T: DeserializeOwned + Default>(
    record_id: &str,
    field: &str,
    raw: &str,
    raw_fields: &mut Vec<RawField>,
) -> T {
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(record = %record_id, field, error = %e, "Malformed JSON column, keeping raw value");
            raw_fields.push(RawField {
                field: field.to_string(),
                raw: raw.to_string(),
            });
            T::default()
        }
    }
}

/// Parse an enum column, recording the raw text instead of failing.
pub(crate) fn decode_text<T: FromStr + Default>(
    record_id: &str,
    field: &str,
    raw: &str,
    raw_fields: &mut Vec<RawField>,
) -> T {
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(record = %record_id, field, raw = %raw, "Unrecognised value, keeping raw text");
            raw_fields.push(RawField {
                field: field.to_string(),
                raw: raw.to_string(),
            });
            T::default()
        }
    }
}
