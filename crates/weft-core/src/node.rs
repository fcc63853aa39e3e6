//! Workflow graph nodes.
//!
//! A [`Node`] is the persisted record: a type tag, an untyped `config`
//! object, and the outgoing edges. [`NodeKind`] is the typed variant decoded
//! from `(node_type, config)` when the node is about to execute, so a
//! malformed config only fails the step that uses it.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{Condition, Logic};
use crate::error::{Result, WeftError};
use crate::types::new_node_id;

/// Node type tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Trigger,
    Condition,
    #[default]
    Action,
    Delay,
    Branch,
    Loop,
    End,
    /// Unrecognised tag. Executes as a pass-through.
    #[serde(other)]
    Unknown,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Condition => "condition",
            Self::Action => "action",
            Self::Delay => "delay",
            Self::Branch => "branch",
            Self::Loop => "loop",
            Self::End => "end",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_delay_seconds() -> u64 {
    5
}

/// A node in a workflow graph, addressed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "node_id", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub config: Value,
    /// Ordered successors. The first entry is the successor of every
    /// non-branching type.
    #[serde(default)]
    pub next_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_true: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub on_false: String,
    /// Upper bound on a single action attempt.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Extra attempts after the first failure of an action.
    #[serde(default)]
    pub retry_count: u32,
    /// Base delay between attempts; doubles per retry.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            node_type,
            config: Value::Null,
            next_nodes: vec![],
            on_error: None,
            on_true: String::new(),
            on_false: String::new(),
            timeout_seconds: default_timeout_seconds(),
            retry_count: 0,
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }

    /// An action node. `params` is merged into the config next to `action_type`.
    pub fn action(id: impl Into<String>, action_type: &str, params: Value) -> Self {
        let mut config = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        config.insert("action_type".into(), Value::String(action_type.into()));
        Self::new(id, NodeType::Action).with_config(Value::Object(config))
    }

    pub fn condition(
        id: impl Into<String>,
        conditions: Vec<Condition>,
        on_true: impl Into<String>,
        on_false: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(id, NodeType::Condition)
            .with_config(serde_json::json!({ "conditions": conditions }));
        node.on_true = on_true.into();
        node.on_false = on_false.into();
        node
    }

    pub fn delay(id: impl Into<String>, seconds: u64) -> Self {
        Self::new(id, NodeType::Delay).with_config(serde_json::json!({ "seconds": seconds }))
    }

    pub fn loop_over(
        id: impl Into<String>,
        variable: &str,
        item_var: &str,
        body_node: &str,
    ) -> Self {
        Self::new(id, NodeType::Loop).with_config(serde_json::json!({
            "variable": variable,
            "item_var": item_var,
            "body_node": body_node,
        }))
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(id, NodeType::End)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next_nodes.push(next.into());
        self
    }

    pub fn with_on_error(mut self, target: impl Into<String>) -> Self {
        self.on_error = Some(target.into());
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay_seconds: u64) -> Self {
        self.retry_count = retry_count;
        self.retry_delay_seconds = retry_delay_seconds;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// The single successor of a non-branching node, or `""`.
    pub fn next(&self) -> &str {
        self.next_nodes.first().map(String::as_str).unwrap_or("")
    }

    /// Error redirect target, if one is set.
    pub fn error_target(&self) -> Option<&str> {
        self.on_error.as_deref().filter(|t| !t.is_empty())
    }

    /// Decode the typed variant for this node.
    pub fn kind(&self) -> Result<NodeKind> {
        Ok(match self.node_type {
            NodeType::Trigger => NodeKind::Trigger,
            NodeType::Condition => NodeKind::Condition {
                spec: self.decode()?,
                on_true: self.on_true.clone(),
                on_false: self.on_false.clone(),
            },
            NodeType::Action => NodeKind::Action(self.action_spec()?),
            NodeType::Delay => NodeKind::Delay(self.decode()?),
            NodeType::Branch => NodeKind::Branch(self.decode()?),
            NodeType::Loop => NodeKind::Loop(self.decode()?),
            NodeType::End => NodeKind::End,
            NodeType::Unknown => NodeKind::Unknown,
        })
    }

    fn decode<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.config.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.config.clone()).map_err(|e| self.config_error(e.to_string()))
    }

    fn action_spec(&self) -> Result<ActionSpec> {
        let config = match &self.config {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(self.config_error(format!("expected an object, got {}", other)));
            }
        };
        let action_type = match config.get("action_type") {
            None | Some(Value::Null) => default_action_type(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(self.config_error(format!("action_type must be a string, got {}", other)));
            }
        };
        Ok(ActionSpec {
            action_type,
            config,
        })
    }

    fn config_error(&self, message: String) -> WeftError {
        WeftError::NodeConfig {
            node_id: self.id.clone(),
            message,
        }
    }
}

/// Typed node variant with its decoded configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Trigger,
    Condition {
        spec: ConditionSpec,
        on_true: String,
        on_false: String,
    },
    Action(ActionSpec),
    Delay(DelaySpec),
    Branch(BranchSpec),
    Loop(LoopSpec),
    End,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
}

fn default_action_type() -> String {
    "log".to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    pub action_type: String,
    /// The full node config, handed to the action handler.
    pub config: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelaySpec {
    #[serde(default)]
    pub seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchSpec {
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub default_node: String,
}

fn default_branch_name() -> String {
    "matched".to_string()
}

/// A named candidate of a branch node. Its conditions are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default = "default_branch_name")]
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub target_node: String,
}

fn default_loop_variable() -> String {
    "loop_items".to_string()
}

fn default_item_var() -> String {
    "current_item".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Context key of the list to iterate.
    #[serde(default = "default_loop_variable")]
    pub variable: String,
    /// Context key the current item is exposed under.
    #[serde(default = "default_item_var")]
    pub item_var: String,
    /// Loop body entry. Empty means the loop node's own successor.
    #[serde(default)]
    pub body_node: String,
}

impl Default for LoopSpec {
    fn default() -> Self {
        Self {
            variable: default_loop_variable(),
            item_var: default_item_var(),
            body_node: String::new(),
        }
    }
}

/// Assign ids to anonymous nodes and reject duplicates.
pub fn normalize_nodes(nodes: &mut [Node]) -> Result<()> {
    let mut seen = HashSet::new();
    for node in nodes.iter_mut() {
        if node.id.is_empty() {
            node.id = new_node_id();
        }
        if !seen.insert(node.id.clone()) {
            return Err(WeftError::InvalidWorkflow(format!(
                "duplicate node id: {}",
                node.id
            )));
        }
    }
    Ok(())
}
