use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use weft_actions::ActionRegistry;
use weft_core::clock::{Clock, SystemClock};
use weft_core::config::{EngineConfig, WeftConfig};
use weft_core::error::{Result, WeftError};
use weft_core::node::normalize_nodes;
use weft_core::types::{
    new_id, AuditEntry, AuditEvent, Context, NewWorkflow, Run, RunStatus, Stats, Step, Workflow,
    WorkflowStatus, WorkflowUpdate, TRIGGER_KEY,
};
use weft_store::SqliteStore;

use crate::interpreter::{Disposition, GraphInterpreter, RunState};
use crate::rate_gate::RateGate;

/// Result of one `execute_run` call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Total steps recorded on the run so far.
    pub steps: usize,
    pub context: Context,
    pub log: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<DateTime<Utc>>,
}

/// Workflow and run management over a [`SqliteStore`].
///
/// Every operation is a short synchronous store transaction except
/// `execute_run`, which drives the graph and awaits action handlers.
/// Nothing advances a run on its own; callers invoke `execute_run`.
pub struct WorkflowEngine {
    store: Arc<SqliteStore>,
    actions: ActionRegistry,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<SqliteStore>, actions: ActionRegistry, config: EngineConfig) -> Self {
        Self {
            store,
            actions,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Open the configured database with only the built-in actions registered.
    pub fn open(config: &WeftConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.store_path())?;
        Ok(Self::new(
            Arc::new(store),
            ActionRegistry::with_builtins(),
            config.engine.clone(),
        ))
    }

    /// In-memory store, built-in actions, default config (for testing).
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(
            Arc::new(SqliteStore::in_memory()?),
            ActionRegistry::with_builtins(),
            EngineConfig::default(),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // ── Workflows ───────────────────────────────────────────────

    pub fn create_workflow(&self, new: NewWorkflow) -> Result<Workflow> {
        let mut nodes = new.nodes;
        normalize_nodes(&mut nodes)?;

        let now = self.clock.now();
        let workflow = Workflow {
            id: new_id(),
            name: new.name,
            description: new.description,
            trigger_type: new.trigger_type,
            trigger_config: new.trigger_config,
            nodes,
            variables: new.variables,
            status: WorkflowStatus::Draft,
            max_runs_per_hour: new
                .max_runs_per_hour
                .unwrap_or(self.config.default_max_runs_per_hour),
            tags: new.tags,
            created_at: now,
            updated_at: now,
            raw_fields: vec![],
        };
        self.store.insert_workflow(&workflow)?;
        self.audit(
            &workflow.id,
            None,
            AuditEvent::WorkflowCreated,
            None,
            &format!("Created: {}", workflow.name),
        )?;

        info!(workflow_id = %workflow.id, name = %workflow.name, nodes = workflow.nodes.len(), "Workflow created");
        Ok(workflow)
    }

    pub fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        self.store.get_workflow(id)
    }

    /// Most recently updated first; `limit` defaults to `list_limit`.
    pub fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        tag: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Workflow>> {
        self.store
            .list_workflows(status, tag, limit.unwrap_or(self.config.list_limit))
    }

    /// Apply an allow-listed update. False when nothing was supplied or the
    /// workflow does not exist. Does not check the graph is well-formed.
    pub fn update_workflow(&self, id: &str, mut update: WorkflowUpdate) -> Result<bool> {
        if let Some(nodes) = update.nodes.as_mut() {
            normalize_nodes(nodes)?;
        }

        let updated = self.store.update_workflow(id, &update, self.clock.now())?;
        if updated {
            let fields = update.field_names().join(", ");
            self.audit(
                id,
                None,
                AuditEvent::WorkflowUpdated,
                None,
                &format!("Fields: {}", fields),
            )?;
            debug!(workflow_id = %id, fields = %fields, "Workflow updated");
        }
        Ok(updated)
    }

    pub fn delete_workflow(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete_workflow(id)?;
        if deleted {
            info!(workflow_id = %id, "Workflow deleted");
        }
        Ok(deleted)
    }

    pub fn activate_workflow(&self, id: &str) -> Result<bool> {
        self.update_workflow(id, WorkflowUpdate::status(WorkflowStatus::Active))
    }

    pub fn pause_workflow(&self, id: &str) -> Result<bool> {
        self.update_workflow(id, WorkflowUpdate::status(WorkflowStatus::Paused))
    }

    // ── Runs ────────────────────────────────────────────────────

    /// Create a running run positioned at the workflow's first node.
    ///
    /// Returns `None` when the workflow is missing, not draft/active, or has
    /// used up its hourly run allowance.
    pub fn start_run(&self, workflow_id: &str, trigger_data: Value) -> Result<Option<String>> {
        let workflow = match self.store.get_workflow(workflow_id)? {
            Some(wf) => wf,
            None => {
                debug!(workflow_id, "Start refused: workflow not found");
                return Ok(None);
            }
        };
        if !workflow.status.accepts_runs() {
            debug!(workflow_id, status = %workflow.status, "Start refused: workflow not accepting runs");
            return Ok(None);
        }

        let now = self.clock.now();
        if !RateGate::new(&self.store).allow(workflow_id, workflow.max_runs_per_hour, now)? {
            warn!(
                workflow_id,
                max_runs_per_hour = workflow.max_runs_per_hour,
                "Start refused: hourly run limit reached"
            );
            return Ok(None);
        }

        let mut context = workflow.variables.clone();
        if has_payload(&trigger_data) {
            context.insert(TRIGGER_KEY.to_string(), trigger_data.clone());
        }

        let run = Run {
            id: new_id(),
            workflow_id: workflow.id.clone(),
            status: RunStatus::Running,
            current_node: workflow.entry_node().to_string(),
            context,
            loop_cursors: Default::default(),
            steps_log: vec![],
            trigger_data,
            started_at: now,
            completed_at: None,
            resume_at: None,
            error: None,
            raw_fields: vec![],
        };
        self.store.insert_run(&run)?;
        self.audit(
            &workflow.id,
            Some(&run.id),
            AuditEvent::RunStarted,
            None,
            &format!("Trigger: {}", run.trigger_data),
        )?;

        info!(workflow_id, run_id = %run.id, "Run started");
        Ok(Some(run.id))
    }

    /// Drive a running run until it ends, fails, suspends, or spends its
    /// step budget, then persist the result.
    pub async fn execute_run(&self, run_id: &str) -> Result<ExecutionReport> {
        let mut run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| WeftError::RunNotFound(run_id.to_string()))?;
        if let Some(raw) = run.raw_fields.first() {
            return Err(WeftError::CorruptRecord {
                id: run.id.clone(),
                field: raw.field.clone(),
            });
        }
        if run.status != RunStatus::Running {
            return Err(WeftError::RunNotExecutable {
                run_id: run.id,
                status: run.status.to_string(),
            });
        }

        let workflow = self
            .store
            .get_workflow(&run.workflow_id)?
            .ok_or_else(|| WeftError::WorkflowNotFound(run.workflow_id.clone()))?;
        if let Some(raw) = workflow.raw_fields.first() {
            return Err(WeftError::CorruptRecord {
                id: workflow.id.clone(),
                field: raw.field.clone(),
            });
        }

        debug!(run_id, workflow_id = %workflow.id, node_id = %run.current_node, "Executing run");
        let interpreter =
            GraphInterpreter::new(&workflow.nodes, &self.actions, self.clock.as_ref(), &self.config);
        let outcome = interpreter.drive(RunState::from_run(&run)).await;

        let new_steps = outcome.steps.len();
        run.current_node = outcome.state.current_node;
        run.context = outcome.state.context;
        run.loop_cursors = outcome.state.loop_cursors;
        run.steps_log.extend(outcome.steps);

        let now = self.clock.now();
        match &outcome.disposition {
            Disposition::Completed | Disposition::BudgetExhausted | Disposition::NodeNotFound(_) => {
                run.status = RunStatus::Completed;
                run.completed_at = Some(now);
            }
            Disposition::Suspended { resume_at } => {
                run.status = RunStatus::Waiting;
                run.resume_at = Some(*resume_at);
            }
            Disposition::Failed { error: message, .. } => {
                run.status = RunStatus::Failed;
                run.error = Some(message.clone());
                run.completed_at = Some(now);
            }
        }
        // Audit rows only describe state that has been persisted
        self.store.save_run(&run)?;

        for step in &run.steps_log[run.steps_log.len() - new_steps..] {
            self.audit(
                &workflow.id,
                Some(&run.id),
                AuditEvent::StepExecuted,
                Some(&step.node_id),
                step.error.as_deref().unwrap_or(""),
            )?;
        }

        match outcome.disposition {
            Disposition::Completed | Disposition::BudgetExhausted | Disposition::NodeNotFound(_) => {
                self.audit(
                    &workflow.id,
                    Some(&run.id),
                    AuditEvent::RunCompleted,
                    None,
                    &format!("Steps: {}", run.steps_log.len()),
                )?;
                info!(run_id, steps = run.steps_log.len(), "Run completed");
            }
            Disposition::Suspended { resume_at } => {
                self.audit(
                    &workflow.id,
                    Some(&run.id),
                    AuditEvent::RunWaiting,
                    None,
                    &format!("Resume at: {}", resume_at.to_rfc3339()),
                )?;
                info!(run_id, resume_at = %resume_at, "Run waiting on delay");
            }
            Disposition::Failed { node_id, error: message } => {
                self.audit(
                    &workflow.id,
                    Some(&run.id),
                    AuditEvent::RunFailed,
                    Some(&node_id),
                    &message,
                )?;
                error!(run_id, node_id = %node_id, error = %message, "Run failed");
            }
        }

        Ok(ExecutionReport {
            run_id: run.id,
            status: run.status,
            steps: run.steps_log.len(),
            context: run.context,
            log: run.steps_log,
            error: run.error,
            resume_at: run.resume_at,
        })
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        self.store.get_run(id)
    }

    /// Newest first; `limit` defaults to `list_limit`.
    pub fn list_runs(
        &self,
        workflow_id: Option<&str>,
        status: Option<RunStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<Run>> {
        self.store
            .list_runs(workflow_id, status, limit.unwrap_or(self.config.list_limit))
    }

    /// Cancel a pending, running, or waiting run. False for unknown or
    /// already-terminal runs. An in-flight `execute_run` is not interrupted.
    pub fn cancel_run(&self, id: &str) -> Result<bool> {
        let run = match self.store.get_run(id)? {
            Some(run) => run,
            None => return Ok(false),
        };
        let cancelled = self.store.cancel_run(id, self.clock.now())?;
        if cancelled {
            self.audit(
                &run.workflow_id,
                Some(id),
                AuditEvent::RunCancelled,
                None,
                &format!("From: {}", run.status),
            )?;
            info!(run_id = %id, "Run cancelled");
        }
        Ok(cancelled)
    }

    /// Move waiting runs whose delay has elapsed back to running.
    /// Returns their ids; each still needs an `execute_run` call.
    pub fn resume_due_runs(&self) -> Result<Vec<String>> {
        let now = self.clock.now();
        let mut resumed = Vec::new();

        for run_id in self.store.due_waiting_runs(now)? {
            if !self.store.resume_run(&run_id)? {
                continue;
            }
            if let Some(run) = self.store.get_run(&run_id)? {
                self.audit(
                    &run.workflow_id,
                    Some(&run_id),
                    AuditEvent::RunResumed,
                    Some(&run.current_node),
                    "",
                )?;
            }
            debug!(run_id = %run_id, "Run resumed");
            resumed.push(run_id);
        }

        if !resumed.is_empty() {
            info!(count = resumed.len(), "Resumed waiting runs");
        }
        Ok(resumed)
    }

    // ── Observability ───────────────────────────────────────────

    /// Newest first; `limit` defaults to `audit_limit`.
    pub fn get_audit_log(
        &self,
        workflow_id: Option<&str>,
        run_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<AuditEntry>> {
        self.store
            .audit_log(workflow_id, run_id, limit.unwrap_or(self.config.audit_limit))
    }

    pub fn stats(&self, workflow_id: Option<&str>) -> Result<Stats> {
        self.store.stats(workflow_id)
    }

    fn audit(
        &self,
        workflow_id: &str,
        run_id: Option<&str>,
        event: AuditEvent,
        node_id: Option<&str>,
        details: &str,
    ) -> Result<()> {
        self.store
            .append_audit(workflow_id, run_id, event, node_id, details, self.clock.now())?;
        Ok(())
    }
}

/// Null and `{}` mean "no trigger payload".
fn has_payload(trigger_data: &Value) -> bool {
    match trigger_data {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
