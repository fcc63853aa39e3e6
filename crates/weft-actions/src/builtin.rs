use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use weft_core::error::{Result, WeftError};
use weft_core::types::Context;

use crate::kind::ActionKind;
use crate::registry::{ActionConfig, ActionHandler};

/// Replace `{{key}}` placeholders with scalar context values.
/// Objects, arrays, and nulls are not substituted.
pub fn interpolate(template: &str, context: &Context) -> String {
    let mut message = template.to_string();
    for (key, value) in context {
        let replacement = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        message = message.replace(&format!("{{{{{}}}}}", key), &replacement);
    }
    message
}

fn parse_input<T: for<'de> Deserialize<'de>>(kind: ActionKind, config: &ActionConfig) -> Result<T> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| WeftError::ActionInput {
        action: kind.to_string(),
        message: e.to_string(),
    })
}

// ── LogAction ───────────────────────────────────────────────────

pub struct LogAction;

#[derive(Deserialize)]
struct LogInput {
    #[serde(default)]
    message: String,
}

impl ActionHandler for LogAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Log
    }

    fn execute<'a>(
        &'a self,
        config: &'a ActionConfig,
        context: &'a mut Context,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let input: LogInput = parse_input(self.kind(), config)?;
            let message = interpolate(&input.message, context);
            info!(message = %message, "Workflow log action");
            Ok(serde_json::json!({ "logged": message }))
        })
    }
}

// ── UpdateVarAction ─────────────────────────────────────────────

pub struct UpdateVarAction;

#[derive(Deserialize)]
struct UpdateVarInput {
    #[serde(default)]
    variable: String,
    #[serde(default)]
    value: Value,
}

impl ActionHandler for UpdateVarAction {
    fn kind(&self) -> ActionKind {
        ActionKind::UpdateVar
    }

    fn execute<'a>(
        &'a self,
        config: &'a ActionConfig,
        context: &'a mut Context,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let input: UpdateVarInput = parse_input(self.kind(), config)?;
            if !input.variable.is_empty() {
                context.insert(input.variable.clone(), input.value);
            }
            Ok(serde_json::json!({ "updated": input.variable }))
        })
    }
}
