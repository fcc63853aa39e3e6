use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::types::Context;

use crate::kind::ActionKind;

/// The action node's config object, `action_type` included.
pub type ActionConfig = serde_json::Map<String, Value>;

/// Side-effect implementation for one action kind.
///
/// Handlers for platform actions (tweet, dm, webhook, ...) are supplied by
/// the embedding application; the engine only ships `log` and `update_var`.
pub trait ActionHandler: Send + Sync + 'static {
    fn kind(&self) -> ActionKind;

    /// Perform the action. The handler may write into `context`; its return
    /// value is stored under `last_action_result`.
    fn execute<'a>(
        &'a self,
        config: &'a ActionConfig,
        context: &'a mut Context,
    ) -> BoxFuture<'a, Result<Value>>;
}

/// Adapts a synchronous closure into an [`ActionHandler`].
pub struct FnAction<F> {
    kind: ActionKind,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ActionConfig, &mut Context) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(kind: ActionKind, f: F) -> Self {
        Self { kind, f }
    }
}

impl<F> ActionHandler for FnAction<F>
where
    F: Fn(&ActionConfig, &mut Context) -> Result<Value> + Send + Sync + 'static,
{
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn execute<'a>(
        &'a self,
        config: &'a ActionConfig,
        context: &'a mut Context,
    ) -> BoxFuture<'a, Result<Value>> {
        let result = (self.f)(config, context);
        Box::pin(async move { result })
    }
}

/// Registry of action handlers, one per kind.
pub struct ActionRegistry {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous handler of the same kind.
    pub fn register(&mut self, handler: impl ActionHandler) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    /// Register a synchronous closure as the handler for `kind`.
    pub fn register_fn<F>(&mut self, kind: ActionKind, f: F)
    where
        F: Fn(&ActionConfig, &mut Context) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(FnAction::new(kind, f));
    }

    pub fn unregister(&mut self, kind: ActionKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, in vocabulary order.
    pub fn kinds(&self) -> Vec<ActionKind> {
        ActionKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// Resolve `action_type` and run its handler within `timeout`.
    ///
    /// Unknown action types and kinds without a handler are errors.
    pub async fn execute(
        &self,
        action_type: &str,
        config: &ActionConfig,
        context: &mut Context,
        timeout: Duration,
    ) -> Result<Value> {
        let kind: ActionKind = action_type.parse()?;
        let handler = self
            .get(kind)
            .ok_or_else(|| WeftError::ActionNotRegistered(kind.to_string()))?;

        match tokio::time::timeout(timeout, handler.execute(config, context)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::ActionTimeout {
                action: kind.to_string(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Create a registry with the built-in actions registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::LogAction);
        registry.register(crate::builtin::UpdateVarAction);
        registry
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
