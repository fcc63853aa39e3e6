use chrono::{DateTime, Utc};
use rusqlite::params;

use weft_core::error::Result;
use weft_core::types::{AuditEntry, AuditEvent};

use crate::store::{db_err, fmt_ts, parse_ts, SqliteStore};

impl SqliteStore {
    /// Append an audit record and return its row id.
    pub fn append_audit(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        event: AuditEvent,
        node_id: Option<&str>,
        details: &str,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO workflow_audit_log (workflow_id, run_id, event_type, node_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![workflow_id, run_id, event.as_str(), node_id, details, fmt_ts(&at)],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first. Ties on timestamp fall back to insertion order.
    pub fn audit_log(
        &self,
        workflow_id: Option<&str>,
        run_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, workflow_id, run_id, event_type, node_id, details, created_at
                 FROM workflow_audit_log
                 WHERE (?1 IS NULL OR workflow_id = ?1) AND (?2 IS NULL OR run_id = ?2)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![workflow_id, run_id, limit as i64], |row| {
                let created_at: String = row.get(6)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    workflow_id: row.get(1)?,
                    run_id: row.get(2)?,
                    event_type: row.get(3)?,
                    node_id: row.get(4)?,
                    details: row.get(5)?,
                    created_at: parse_ts(&created_at),
                })
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }
}
