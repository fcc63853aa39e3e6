use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Lookup errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {run_id} is not executable (status: {status})")]
    RunNotExecutable { run_id: String, status: String },

    // Definition errors
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Invalid config for node {node_id}: {message}")]
    NodeConfig { node_id: String, message: String },

    // Action errors
    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("No handler registered for action: {0}")]
    ActionNotRegistered(String),

    #[error("Action input validation failed: {action}: {message}")]
    ActionInput { action: String, message: String },

    #[error("Action failed: {action}: {message}")]
    ActionFailed { action: String, message: String },

    #[error("Action timeout after {timeout_secs}s: {action}")]
    ActionTimeout { action: String, timeout_secs: u64 },

    // Persistence errors
    #[error("Corrupt {field} on record {id}")]
    CorruptRecord { id: String, field: String },

    #[error("Database error: {0}")]
    Database(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
