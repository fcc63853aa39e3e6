use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::WeftError;
use crate::node::{Node, NodeType};

/// Mutable key/value state threaded through a run.
pub type Context = serde_json::Map<String, Value>;

/// Context key the trigger payload is seeded under.
pub const TRIGGER_KEY: &str = "trigger";

/// Context key holding the most recent action result.
pub const LAST_ACTION_RESULT_KEY: &str = "last_action_result";

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short node identifier.
pub fn new_node_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = WeftError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(WeftError::InvalidWorkflow(format!(
                        "unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// How a workflow gets started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Schedule,
    Event,
    Webhook,
    #[default]
    Manual,
    FollowerMilestone,
    Keyword,
}

string_enum!(TriggerType {
    Schedule => "schedule",
    Event => "event",
    Webhook => "webhook",
    Manual => "manual",
    FollowerMilestone => "follower_milestone",
    Keyword => "keyword",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
    Error,
}

string_enum!(WorkflowStatus {
    Draft => "draft",
    Active => "active",
    Paused => "paused",
    Archived => "archived",
    Error => "error",
});

impl WorkflowStatus {
    /// Whether new runs may be started.
    pub fn accepts_runs(&self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Waiting,
}

string_enum!(RunStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Waiting => "waiting",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A composite column that could not be decoded. The typed field it belongs
/// to is left at its default; the stored text is kept here untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    pub field: String,
    pub raw: String,
}

/// A persisted workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub variables: Context,
    #[serde(default)]
    pub status: WorkflowStatus,
    pub max_runs_per_hour: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_fields: Vec<RawField>,
}

impl Workflow {
    /// Id of the node a new run starts at (empty when there are no nodes).
    pub fn entry_node(&self) -> &str {
        self.nodes.first().map(|n| n.id.as_str()).unwrap_or("")
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_intact(&self) -> bool {
        self.raw_fields.is_empty()
    }
}

/// Everything needed to create a workflow. Doubles as the template format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub variables: Context,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Falls back to the engine default when unset.
    #[serde(default)]
    pub max_runs_per_hour: Option<u32>,
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_trigger(mut self, trigger_type: TriggerType, config: Value) -> Self {
        self.trigger_type = trigger_type;
        self.trigger_config = config;
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_max_runs_per_hour(mut self, max: u32) -> Self {
        self.max_runs_per_hour = Some(max);
        self
    }
}

/// Allow-listed workflow mutation. Unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_config: Option<Value>,
    #[serde(default)]
    pub nodes: Option<Vec<Node>>,
    #[serde(default)]
    pub variables: Option<Context>,
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    #[serde(default)]
    pub max_runs_per_hour: Option<u32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl WorkflowUpdate {
    pub fn status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Names of the fields this update touches.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.name.is_some() {
            names.push("name");
        }
        if self.description.is_some() {
            names.push("description");
        }
        if self.trigger_type.is_some() {
            names.push("trigger_type");
        }
        if self.trigger_config.is_some() {
            names.push("trigger_config");
        }
        if self.nodes.is_some() {
            names.push("nodes");
        }
        if self.variables.is_some() {
            names.push("variables");
        }
        if self.status.is_some() {
            names.push("status");
        }
        if self.max_runs_per_hour.is_some() {
            names.push("max_runs_per_hour");
        }
        if self.tags.is_some() {
            names.push("tags");
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }
}

/// Outcome of a single node visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Success,
    Error,
    Waiting,
}

/// Record of one node execution within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub node_id: String,
    pub node_type: NodeType,
    pub timestamp: DateTime<Utc>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, timestamp: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            timestamp,
            status: StepStatus::Success,
            result: None,
            branch: None,
            delay: None,
            iteration: None,
            attempts: None,
            error: None,
        }
    }
}

/// One execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Node to execute next; empty once the run has nowhere left to go.
    #[serde(default)]
    pub current_node: String,
    #[serde(default)]
    pub context: Context,
    /// Loop node id -> index of the next item. Kept out of `context`.
    #[serde(default)]
    pub loop_cursors: BTreeMap<String, usize>,
    #[serde(default)]
    pub steps_log: Vec<Step>,
    #[serde(default)]
    pub trigger_data: Value,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set while a suspended delay is pending.
    #[serde(default)]
    pub resume_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_fields: Vec<RawField>,
}

impl Run {
    pub fn is_intact(&self) -> bool {
        self.raw_fields.is_empty()
    }
}

/// Lifecycle and per-step events written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    WorkflowCreated,
    WorkflowUpdated,
    RunStarted,
    StepExecuted,
    RunWaiting,
    RunResumed,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

string_enum!(AuditEvent {
    WorkflowCreated => "workflow_created",
    WorkflowUpdated => "workflow_updated",
    RunStarted => "run_started",
    StepExecuted => "step_executed",
    RunWaiting => "run_waiting",
    RunResumed => "run_resumed",
    RunCompleted => "run_completed",
    RunFailed => "run_failed",
    RunCancelled => "run_cancelled",
});

/// An append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub workflow_id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Kept as text so unfamiliar event names still read back.
    pub event_type: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Run and workflow counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_runs: u64,
    pub by_status: BTreeMap<String, u64>,
    pub total_workflows: u64,
    pub active_workflows: u64,
}
