use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "weft.db".to_string()
}

/// What a delay node does when it is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayMode {
    /// Record the requested duration and continue immediately.
    #[default]
    Record,
    /// Park the run in `waiting` until the delay has elapsed.
    Suspend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard cap on nodes visited per `execute_run` call.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub delay_mode: DelayMode,
    /// Used when a workflow is created without its own limit.
    #[serde(default = "default_max_runs_per_hour")]
    pub default_max_runs_per_hour: u32,
    /// Ceiling for action retry backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_audit_limit")]
    pub audit_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            delay_mode: DelayMode::default(),
            default_max_runs_per_hour: default_max_runs_per_hour(),
            max_backoff_secs: default_max_backoff_secs(),
            list_limit: default_list_limit(),
            audit_limit: default_audit_limit(),
        }
    }
}

fn default_max_steps() -> usize {
    100
}
fn default_max_runs_per_hour() -> u32 {
    10
}
fn default_max_backoff_secs() -> u64 {
    300
}
fn default_list_limit() -> usize {
    50
}
fn default_audit_limit() -> usize {
    100
}

impl WeftConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Resolve the database path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        let path = &self.store.path;
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables are left as written
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
