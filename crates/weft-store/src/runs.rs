use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::debug;

use weft_core::error::Result;
use weft_core::types::{Run, RunStatus, Stats};

use crate::store::{db_err, decode_json, decode_text, fmt_ts, parse_ts, to_json, SqliteStore};

const RUN_COLUMNS: &str = "run_id, workflow_id, status, current_node, context, loop_cursors, \
     steps_log, trigger_data, started_at, completed_at, resume_at, error";

struct RunRow {
    id: String,
    workflow_id: String,
    status: String,
    current_node: String,
    context: String,
    loop_cursors: String,
    steps_log: String,
    trigger_data: String,
    started_at: String,
    completed_at: Option<String>,
    resume_at: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            status: row.get(2)?,
            current_node: row.get(3)?,
            context: row.get(4)?,
            loop_cursors: row.get(5)?,
            steps_log: row.get(6)?,
            trigger_data: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
            resume_at: row.get(10)?,
            error: row.get(11)?,
        })
    }

    fn into_run(self) -> Run {
        let mut raw = Vec::new();
        let id = self.id;
        Run {
            status: decode_text(&id, "status", &self.status, &mut raw),
            context: decode_json(&id, "context", &self.context, &mut raw),
            loop_cursors: decode_json(&id, "loop_cursors", &self.loop_cursors, &mut raw),
            steps_log: decode_json(&id, "steps_log", &self.steps_log, &mut raw),
            trigger_data: decode_json(&id, "trigger_data", &self.trigger_data, &mut raw),
            workflow_id: self.workflow_id,
            current_node: self.current_node,
            started_at: parse_ts(&self.started_at),
            completed_at: self.completed_at.as_deref().map(parse_ts),
            resume_at: self.resume_at.as_deref().map(parse_ts),
            error: self.error,
            raw_fields: raw,
            id,
        }
    }
}

fn collect_runs(rows: impl Iterator<Item = rusqlite::Result<RunRow>>) -> Result<Vec<Run>> {
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row.map_err(db_err)?.into_run());
    }
    Ok(runs)
}

impl SqliteStore {
    pub fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO workflow_runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                RUN_COLUMNS
            ),
            params![
                run.id,
                run.workflow_id,
                run.status.as_str(),
                run.current_node,
                to_json(&run.context)?,
                to_json(&run.loop_cursors)?,
                to_json(&run.steps_log)?,
                to_json(&run.trigger_data)?,
                fmt_ts(&run.started_at),
                run.completed_at.as_ref().map(fmt_ts),
                run.resume_at.as_ref().map(fmt_ts),
                run.error,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM workflow_runs WHERE run_id = ?1", RUN_COLUMNS),
                params![id],
                RunRow::from_row,
            )
            .optional()
            .map_err(db_err)?;
        Ok(row.map(RunRow::into_run))
    }

    /// Newest first.
    pub fn list_runs(
        &self,
        workflow_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<Run>> {
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(workflow_id) = workflow_id {
            values.push(SqlValue::Text(workflow_id.to_string()));
            clauses.push(format!("workflow_id = ?{}", values.len()));
        }
        if let Some(status) = status {
            values.push(SqlValue::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        values.push(SqlValue::Integer(limit as i64));

        let mut sql = format!("SELECT {} FROM workflow_runs", RUN_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY started_at DESC LIMIT ?{}", values.len()));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(values), RunRow::from_row)
            .map_err(db_err)?;
        collect_runs(rows)
    }

    /// Overwrite the mutable state of a run.
    pub fn save_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE workflow_runs SET status = ?1, current_node = ?2, context = ?3,
                loop_cursors = ?4, steps_log = ?5, completed_at = ?6, resume_at = ?7, error = ?8
             WHERE run_id = ?9",
            params![
                run.status.as_str(),
                run.current_node,
                to_json(&run.context)?,
                to_json(&run.loop_cursors)?,
                to_json(&run.steps_log)?,
                run.completed_at.as_ref().map(fmt_ts),
                run.resume_at.as_ref().map(fmt_ts),
                run.error,
                run.id,
            ],
        )
        .map_err(db_err)?;
        debug!(run_id = %run.id, status = %run.status, "Run saved");
        Ok(())
    }

    /// Cancel a run that has not finished. Terminal runs are left untouched.
    pub fn cancel_run(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE workflow_runs SET status = 'cancelled', completed_at = ?1, resume_at = NULL
                 WHERE run_id = ?2 AND status IN ('pending', 'running', 'waiting')",
                params![fmt_ts(&now), id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Number of runs of a workflow started strictly after `since`, any status.
    pub fn count_runs_since(&self, workflow_id: &str, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM workflow_runs WHERE workflow_id = ?1 AND started_at > ?2",
                params![workflow_id, fmt_ts(&since)],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as u64)
    }

    /// Ids of waiting runs whose `resume_at` has passed, oldest first.
    pub fn due_waiting_runs(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id FROM workflow_runs
                 WHERE status = 'waiting' AND resume_at IS NOT NULL AND resume_at <= ?1
                 ORDER BY resume_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![fmt_ts(&now)], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.map_err(db_err)?);
        }
        Ok(ids)
    }

    /// Move a waiting run back to running. False if it was not waiting.
    pub fn resume_run(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE workflow_runs SET status = 'running', resume_at = NULL
                 WHERE run_id = ?1 AND status = 'waiting'",
                params![id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Run counts by status, optionally for one workflow, plus workflow totals.
    pub fn stats(&self, workflow_id: Option<&str>) -> Result<Stats> {
        let mut stats = Stats::default();
        {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(
                    "SELECT status, COUNT(*) FROM workflow_runs
                     WHERE ?1 IS NULL OR workflow_id = ?1
                     GROUP BY status",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![workflow_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(db_err)?;
            for row in rows {
                let (status, count) = row.map_err(db_err)?;
                stats.total_runs += count as u64;
                stats.by_status.insert(status, count as u64);
            }
        }

        let (total, active) = self.workflow_counts()?;
        stats.total_workflows = total;
        stats.active_workflows = active;
        Ok(stats)
    }
}
