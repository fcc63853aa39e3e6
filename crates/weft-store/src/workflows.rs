use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use weft_core::error::Result;
use weft_core::types::{Workflow, WorkflowStatus, WorkflowUpdate};

use crate::store::{db_err, decode_json, decode_text, fmt_ts, parse_ts, to_json, SqliteStore};

const WORKFLOW_COLUMNS: &str = "workflow_id, name, description, trigger_type, trigger_config, \
     nodes, variables, status, max_runs_per_hour, created_at, updated_at, tags";

/// A workflow row as stored, before JSON decoding.
struct WorkflowRow {
    id: String,
    name: String,
    description: String,
    trigger_type: String,
    trigger_config: String,
    nodes: String,
    variables: String,
    status: String,
    max_runs_per_hour: i64,
    created_at: String,
    updated_at: String,
    tags: String,
}

impl WorkflowRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            trigger_type: row.get(3)?,
            trigger_config: row.get(4)?,
            nodes: row.get(5)?,
            variables: row.get(6)?,
            status: row.get(7)?,
            max_runs_per_hour: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            tags: row.get(11)?,
        })
    }

    fn into_workflow(self) -> Workflow {
        let mut raw = Vec::new();
        let id = self.id;
        Workflow {
            trigger_type: decode_text(&id, "trigger_type", &self.trigger_type, &mut raw),
            trigger_config: decode_json(&id, "trigger_config", &self.trigger_config, &mut raw),
            nodes: decode_json(&id, "nodes", &self.nodes, &mut raw),
            variables: decode_json(&id, "variables", &self.variables, &mut raw),
            status: decode_text(&id, "status", &self.status, &mut raw),
            tags: decode_json(&id, "tags", &self.tags, &mut raw),
            name: self.name,
            description: self.description,
            max_runs_per_hour: self.max_runs_per_hour.max(0) as u32,
            created_at: parse_ts(&self.created_at),
            updated_at: parse_ts(&self.updated_at),
            raw_fields: raw,
            id,
        }
    }
}

impl SqliteStore {
    pub fn insert_workflow(&self, wf: &Workflow) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO workflows ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                WORKFLOW_COLUMNS
            ),
            params![
                wf.id,
                wf.name,
                wf.description,
                wf.trigger_type.as_str(),
                to_json(&wf.trigger_config)?,
                to_json(&wf.nodes)?,
                to_json(&wf.variables)?,
                wf.status.as_str(),
                wf.max_runs_per_hour as i64,
                fmt_ts(&wf.created_at),
                fmt_ts(&wf.updated_at),
                to_json(&wf.tags)?,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM workflows WHERE workflow_id = ?1", WORKFLOW_COLUMNS),
                params![id],
                WorkflowRow::from_row,
            )
            .optional()
            .map_err(db_err)?;
        Ok(row.map(WorkflowRow::into_workflow))
    }

    /// Most recently updated first. `tag` matches an exact element of the tag list.
    pub fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Workflow>> {
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(status) = status {
            values.push(SqlValue::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(tag) = tag {
            values.push(SqlValue::Text(format!("%{}%", escape_like(&to_json(&tag)?))));
            clauses.push(format!("tags LIKE ?{} ESCAPE '\\'", values.len()));
        }
        values.push(SqlValue::Integer(limit as i64));

        let mut sql = format!("SELECT {} FROM workflows", WORKFLOW_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY updated_at DESC LIMIT ?{}", values.len()));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(values), WorkflowRow::from_row)
            .map_err(db_err)?;

        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row.map_err(db_err)?.into_workflow());
        }
        Ok(workflows)
    }

    /// Apply an allow-listed update and bump `updated_at`.
    /// Returns false when nothing was set or the workflow does not exist.
    pub fn update_workflow(
        &self,
        id: &str,
        update: &WorkflowUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut sets: Vec<(&str, SqlValue)> = Vec::new();

        if let Some(name) = &update.name {
            sets.push(("name", SqlValue::Text(name.clone())));
        }
        if let Some(description) = &update.description {
            sets.push(("description", SqlValue::Text(description.clone())));
        }
        if let Some(trigger_type) = update.trigger_type {
            sets.push(("trigger_type", SqlValue::Text(trigger_type.as_str().into())));
        }
        if let Some(trigger_config) = &update.trigger_config {
            sets.push(("trigger_config", SqlValue::Text(to_json(trigger_config)?)));
        }
        if let Some(nodes) = &update.nodes {
            sets.push(("nodes", SqlValue::Text(to_json(nodes)?)));
        }
        if let Some(variables) = &update.variables {
            sets.push(("variables", SqlValue::Text(to_json(variables)?)));
        }
        if let Some(status) = update.status {
            sets.push(("status", SqlValue::Text(status.as_str().into())));
        }
        if let Some(max) = update.max_runs_per_hour {
            sets.push(("max_runs_per_hour", SqlValue::Integer(max as i64)));
        }
        if let Some(tags) = &update.tags {
            sets.push(("tags", SqlValue::Text(to_json(tags)?)));
        }

        if sets.is_empty() {
            return Ok(false);
        }
        sets.push(("updated_at", SqlValue::Text(fmt_ts(&now))));

        let set_clause = sets
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE workflows SET {} WHERE workflow_id = ?{}",
            set_clause,
            sets.len() + 1
        );

        let mut values: Vec<SqlValue> = sets.into_iter().map(|(_, v)| v).collect();
        values.push(SqlValue::Text(id.to_string()));

        let conn = self.conn()?;
        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn delete_workflow(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM workflows WHERE workflow_id = ?1", params![id])
            .map_err(db_err)?;
        Ok(deleted > 0)
    }

    /// (total workflows, active workflows)
    pub fn workflow_counts(&self) -> Result<(u64, u64)> {
        let conn = self.conn()?;
        let (total, active): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = 'active'), 0) FROM workflows",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;
        Ok((total as u64, active as u64))
    }
}

/// Escape `LIKE` wildcards so the pattern matches literally.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weft_core::node::Node;
    use weft_core::types::TriggerType;

    fn workflow(id: &str, name: &str, at: DateTime<Utc>) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            trigger_type: TriggerType::Manual,
            trigger_config: json!({}),
            nodes: vec![Node::end("end")],
            variables: Default::default(),
            status: WorkflowStatus::Draft,
            max_runs_per_hour: 10,
            tags: vec![],
            created_at: at,
            updated_at: at,
            raw_fields: vec![],
        }
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let mut wf = workflow("wf-1", "Round trip", now);
        wf.trigger_type = TriggerType::Event;
        wf.trigger_config = json!({"event": "new_follower"});
        wf.nodes = vec![
            Node::action("greet", "log", json!({"message": "hi"})).with_next("end"),
            Node::end("end"),
        ];
        wf.variables.insert("threshold".into(), json!(100));
        wf.tags = vec!["growth".into(), "dm".into()];
        store.insert_workflow(&wf).unwrap();

        let loaded = store.get_workflow("wf-1").unwrap().unwrap();
        assert!(loaded.is_intact());
        assert_eq!(loaded.name, "Round trip");
        assert_eq!(loaded.trigger_type, TriggerType::Event);
        assert_eq!(loaded.trigger_config, wf.trigger_config);
        assert_eq!(loaded.nodes, wf.nodes);
        assert_eq!(loaded.variables, wf.variables);
        assert_eq!(loaded.tags, wf.tags);
    }

    #[test]
    fn test_get_missing() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_workflow("nope").unwrap().is_none());
    }

    #[test]
    fn test_list_filters() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let mut a = workflow("a", "A", now);
        a.tags = vec!["engagement".into()];
        let mut b = workflow("b", "B", now + chrono::Duration::seconds(1));
        b.status = WorkflowStatus::Active;
        b.tags = vec!["engagement-extra".into()];
        store.insert_workflow(&a).unwrap();
        store.insert_workflow(&b).unwrap();

        let all = store.list_workflows(None, None, 50).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "b");

        let active = store
            .list_workflows(Some(WorkflowStatus::Active), None, 50)
            .unwrap();
        assert_eq!(active.len(), 1);

        let tagged = store.list_workflows(None, Some("engagement"), 50).unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, "a");

        assert_eq!(store.list_workflows(None, None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_tag_filter_treats_wildcards_literally() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let mut underscore = workflow("underscore", "U", now);
        underscore.tags = vec!["a_c".into()];
        let mut plain = workflow("plain", "P", now);
        plain.tags = vec!["abc".into()];
        let mut percent = workflow("percent", "Pct", now);
        percent.tags = vec!["50%".into()];
        let mut slash = workflow("slash", "S", now);
        slash.tags = vec![r"dir\x".into()];
        for wf in [&underscore, &plain, &percent, &slash] {
            store.insert_workflow(wf).unwrap();
        }

        let ids = |tag: &str| -> Vec<String> {
            store
                .list_workflows(None, Some(tag), 50)
                .unwrap()
                .into_iter()
                .map(|w| w.id)
                .collect()
        };
        assert_eq!(ids("a_c"), vec!["underscore"]);
        assert_eq!(ids("abc"), vec!["plain"]);
        assert_eq!(ids("50%"), vec!["percent"]);
        assert!(ids("5%").is_empty());
        assert_eq!(ids(r"dir\x"), vec!["slash"]);
    }

    #[test]
    fn test_update_allow_list() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        store.insert_workflow(&workflow("wf", "Original", now)).unwrap();

        assert!(!store
            .update_workflow("wf", &WorkflowUpdate::default(), now)
            .unwrap());

        let later = now + chrono::Duration::minutes(5);
        let update = WorkflowUpdate {
            name: Some("Updated".into()),
            max_runs_per_hour: Some(3),
            ..Default::default()
        };
        assert!(store.update_workflow("wf", &update, later).unwrap());
        let loaded = store.get_workflow("wf").unwrap().unwrap();
        assert_eq!(loaded.name, "Updated");
        assert_eq!(loaded.max_runs_per_hour, 3);
        assert!(loaded.updated_at > loaded.created_at);

        assert!(!store.update_workflow("fake", &update, later).unwrap());
    }

    #[test]
    fn test_delete() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_workflow(&workflow("wf", "Delete me", Utc::now())).unwrap();
        assert!(store.delete_workflow("wf").unwrap());
        assert!(!store.delete_workflow("wf").unwrap());
        assert!(store.get_workflow("wf").unwrap().is_none());
    }

    #[test]
    fn test_malformed_columns_are_kept_raw() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_workflow(&workflow("wf", "Corrupt", Utc::now())).unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE workflows SET nodes = '[{broken', status = 'melted' WHERE workflow_id = 'wf'",
                [],
            )
            .unwrap();

        let loaded = store.get_workflow("wf").unwrap().unwrap();
        assert!(!loaded.is_intact());
        assert!(loaded.nodes.is_empty());
        assert_eq!(loaded.status, WorkflowStatus::Draft);
        let fields: Vec<_> = loaded.raw_fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["nodes", "status"]);
        assert_eq!(loaded.raw_fields[0].raw, "[{broken");

        // Listing still works
        assert_eq!(store.list_workflows(None, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_workflow_counts() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.workflow_counts().unwrap(), (0, 0));
        let mut wf = workflow("a", "A", Utc::now());
        wf.status = WorkflowStatus::Active;
        store.insert_workflow(&wf).unwrap();
        store.insert_workflow(&workflow("b", "B", Utc::now())).unwrap();
        assert_eq!(store.workflow_counts().unwrap(), (2, 1));
    }
}
