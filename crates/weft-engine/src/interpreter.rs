//! Bounded interpreter over a workflow graph.
//!
//! [`GraphInterpreter::drive`] takes the resumable part of a run
//! ([`RunState`]), visits nodes until the run ends, fails, suspends, or the
//! step budget is spent, and hands back the new state with the steps it
//! produced. It never touches storage; the engine loads before and saves after.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

use weft_actions::ActionRegistry;
use weft_core::clock::Clock;
use weft_core::condition::{evaluate_multi, Logic};
use weft_core::config::{DelayMode, EngineConfig};
use weft_core::error::{Result, WeftError};
use weft_core::node::{ActionSpec, BranchSpec, DelaySpec, LoopSpec, Node, NodeKind};
use weft_core::types::{Context, Run, Step, StepStatus, LAST_ACTION_RESULT_KEY};

use crate::retry::{is_retryable, RetryPolicy};

/// The mutable part of a run that survives between `drive` calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub current_node: String,
    pub context: Context,
    pub loop_cursors: BTreeMap<String, usize>,
}

impl RunState {
    pub fn from_run(run: &Run) -> Self {
        Self {
            current_node: run.current_node.clone(),
            context: run.context.clone(),
            loop_cursors: run.loop_cursors.clone(),
        }
    }
}

/// Why a `drive` call stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Reached an end node, or a node with nowhere to go.
    Completed,
    /// The step budget ran out with `current_node` still set.
    BudgetExhausted,
    /// `current_node` names a node the graph does not contain.
    NodeNotFound(String),
    /// Parked on a delay node until `resume_at`.
    Suspended { resume_at: DateTime<Utc> },
    /// A node failed and had no error redirect.
    Failed { node_id: String, error: String },
}

#[derive(Debug, Clone)]
pub struct DriveOutcome {
    pub state: RunState,
    /// Steps produced by this call, in visit order.
    pub steps: Vec<Step>,
    pub disposition: Disposition,
}

enum Transition {
    Goto(String),
    End,
    Suspend {
        next: String,
        resume_at: DateTime<Utc>,
    },
}

pub struct GraphInterpreter<'a> {
    nodes: HashMap<&'a str, &'a Node>,
    actions: &'a ActionRegistry,
    clock: &'a dyn Clock,
    config: &'a EngineConfig,
}

impl<'a> GraphInterpreter<'a> {
    pub fn new(
        nodes: &'a [Node],
        actions: &'a ActionRegistry,
        clock: &'a dyn Clock,
        config: &'a EngineConfig,
    ) -> Self {
        let nodes = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        Self {
            nodes,
            actions,
            clock,
            config,
        }
    }

    /// Advance `state` through the graph for at most `max_steps` node visits.
    pub async fn drive(&self, mut state: RunState) -> DriveOutcome {
        let mut steps = Vec::new();

        for _ in 0..self.config.max_steps {
            if state.current_node.is_empty() {
                return finish(state, steps, Disposition::Completed);
            }

            let node = match self.nodes.get(state.current_node.as_str()) {
                Some(node) => *node,
                None => {
                    warn!(node_id = %state.current_node, "Node not found in graph, stopping");
                    let missing = state.current_node.clone();
                    return finish(state, steps, Disposition::NodeNotFound(missing));
                }
            };

            debug!(node_id = %node.id, node_type = %node.node_type, "Executing node");
            let mut step = Step::new(&node.id, node.node_type, self.clock.now());

            match self.visit(node, &mut state, &mut step).await {
                Ok(Transition::Goto(next)) => {
                    state.current_node = next;
                    steps.push(step);
                }
                Ok(Transition::End) => {
                    state.current_node.clear();
                    steps.push(step);
                    return finish(state, steps, Disposition::Completed);
                }
                Ok(Transition::Suspend { next, resume_at }) => {
                    step.status = StepStatus::Waiting;
                    state.current_node = next;
                    steps.push(step);
                    return finish(state, steps, Disposition::Suspended { resume_at });
                }
                Err(e) => {
                    let message = e.to_string();
                    step.status = StepStatus::Error;
                    step.error = Some(message.clone());
                    steps.push(step);

                    match node.error_target() {
                        Some(target) => {
                            warn!(node_id = %node.id, on_error = %target, error = %message, "Node failed, redirecting");
                            state.current_node = target.to_string();
                        }
                        None => {
                            error!(node_id = %node.id, error = %message, "Node failed");
                            let node_id = node.id.clone();
                            return finish(
                                state,
                                steps,
                                Disposition::Failed {
                                    node_id,
                                    error: message,
                                },
                            );
                        }
                    }
                }
            }
        }

        if state.current_node.is_empty() {
            return finish(state, steps, Disposition::Completed);
        }
        warn!(
            node_id = %state.current_node,
            max_steps = self.config.max_steps,
            "Step budget exhausted"
        );
        finish(state, steps, Disposition::BudgetExhausted)
    }

    async fn visit(&self, node: &Node, state: &mut RunState, step: &mut Step) -> Result<Transition> {
        match node.kind()? {
            NodeKind::Condition {
                spec,
                on_true,
                on_false,
            } => {
                let passed = evaluate_multi(&spec.conditions, &state.context, spec.logic);
                step.result = Some(Value::Bool(passed));
                Ok(Transition::Goto(if passed { on_true } else { on_false }))
            }
            NodeKind::Action(spec) => self.run_action(node, spec, state, step).await,
            NodeKind::Delay(spec) => self.delay(node, &spec, step),
            NodeKind::Branch(spec) => Ok(Transition::Goto(choose_branch(&spec, &state.context, step))),
            NodeKind::Loop(spec) => advance_loop(node, &spec, state, step),
            NodeKind::End => {
                step.result = Some(Value::String("workflow_complete".into()));
                Ok(Transition::End)
            }
            NodeKind::Trigger | NodeKind::Unknown => Ok(Transition::Goto(node.next().to_string())),
        }
    }

    /// Dispatch an action, retrying transient failures with backoff.
    /// Context writes from a failed attempt are rolled back.
    async fn run_action(
        &self,
        node: &Node,
        spec: ActionSpec,
        state: &mut RunState,
        step: &mut Step,
    ) -> Result<Transition> {
        let policy = RetryPolicy::for_node(node, self.config.max_backoff_secs);
        let timeout = Duration::from_secs(node.timeout_seconds);
        let mut attempt = 0;

        loop {
            let snapshot = state.context.clone();
            let result = self
                .actions
                .execute(&spec.action_type, &spec.config, &mut state.context, timeout)
                .await;

            match result {
                Ok(value) => {
                    step.attempts = Some(attempt + 1);
                    state
                        .context
                        .insert(LAST_ACTION_RESULT_KEY.to_string(), value.clone());
                    step.result = Some(value);
                    return Ok(Transition::Goto(node.next().to_string()));
                }
                Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                    state.context = snapshot;
                    let backoff = policy.backoff(attempt);
                    warn!(
                        node_id = %node.id,
                        action = %spec.action_type,
                        attempt = attempt + 1,
                        max_retries = policy.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying action"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    state.context = snapshot;
                    step.attempts = Some(attempt + 1);
                    return Err(e);
                }
            }
        }
    }

    fn delay(&self, node: &Node, spec: &DelaySpec, step: &mut Step) -> Result<Transition> {
        step.delay = Some(spec.seconds);
        let next = node.next().to_string();

        if self.config.delay_mode == DelayMode::Record || spec.seconds == 0 {
            return Ok(Transition::Goto(next));
        }

        let resume_at = chrono::Duration::from_std(Duration::from_secs(spec.seconds))
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .ok_or_else(|| WeftError::NodeConfig {
                node_id: node.id.clone(),
                message: format!("delay of {}s is out of range", spec.seconds),
            })?;
        Ok(Transition::Suspend { next, resume_at })
    }
}

fn finish(state: RunState, steps: Vec<Step>, disposition: Disposition) -> DriveOutcome {
    DriveOutcome {
        state,
        steps,
        disposition,
    }
}

/// First branch whose conditions all hold, else the default target.
fn choose_branch(spec: &BranchSpec, context: &Context, step: &mut Step) -> String {
    for branch in &spec.branches {
        if evaluate_multi(&branch.conditions, context, Logic::And) {
            step.branch = Some(branch.name.clone());
            return branch.target_node.clone();
        }
    }
    step.branch = Some("default".to_string());
    spec.default_node.clone()
}

fn advance_loop(
    node: &Node,
    spec: &LoopSpec,
    state: &mut RunState,
    step: &mut Step,
) -> Result<Transition> {
    let item = match state.context.get(&spec.variable) {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let index = state.loop_cursors.get(&node.id).copied().unwrap_or(0);
            items.get(index).cloned().map(|item| (index, item))
        }
        Some(other) => {
            return Err(WeftError::NodeConfig {
                node_id: node.id.clone(),
                message: format!("loop variable '{}' is not a list: {}", spec.variable, other),
            });
        }
    };

    match item {
        Some((index, item)) => {
            state.context.insert(spec.item_var.clone(), item);
            state.loop_cursors.insert(node.id.clone(), index + 1);
            step.iteration = Some(index);
            let body = if spec.body_node.is_empty() {
                node.next()
            } else {
                spec.body_node.as_str()
            };
            Ok(Transition::Goto(body.to_string()))
        }
        None => {
            state.loop_cursors.remove(&node.id);
            Ok(Transition::Goto(node.next().to_string()))
        }
    }
}
