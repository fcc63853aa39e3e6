use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weft_core::config::WeftConfig;
use weft_core::types::{NewWorkflow, RunStatus, WorkflowStatus};
use weft_engine::templates;
use weft_engine::WorkflowEngine;

#[derive(Parser)]
#[command(name = "weft", version, about = "Persisted workflow automation engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weft.toml")]
    config: PathBuf,

    /// Override the database path from the config
    #[arg(long, env = "WEFT_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workflow definitions
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Print a built-in template as JSON
    Template {
        /// welcome_dm, engagement_boost, or content_pipeline
        name: String,
    },
    /// Start, execute, and inspect runs
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
    /// Move waiting runs whose delay has elapsed back to running
    ResumeDue {
        /// Execute each resumed run immediately
        #[arg(long)]
        exec: bool,
    },
    /// Show the audit trail, newest first
    Audit {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run and workflow counts
    Stats {
        #[arg(long)]
        workflow: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Create a workflow from a JSON file or a template
    Create {
        /// JSON file holding the workflow definition
        #[arg(long, conflicts_with = "template")]
        file: Option<PathBuf>,
        /// Built-in template name
        #[arg(long)]
        template: Option<String>,
        /// Override the workflow name
        #[arg(long)]
        name: Option<String>,
    },
    /// List workflows, most recently updated first
    List {
        #[arg(long)]
        status: Option<WorkflowStatus>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    Show { id: String },
    Activate { id: String },
    Pause { id: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum RunAction {
    /// Start a run of a workflow
    Start {
        workflow_id: String,
        /// Trigger payload as JSON
        #[arg(long)]
        trigger: Option<String>,
        /// Execute the run right after starting it
        #[arg(long)]
        exec: bool,
    },
    /// Execute a running run
    Exec { run_id: String },
    Show { run_id: String },
    /// List runs, newest first
    List {
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long)]
        status: Option<RunStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },
    Cancel { run_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Templates need no database
    if let Commands::Template { name } = &cli.command {
        let template = templates::by_name(name).with_context(|| {
            format!(
                "Unknown template '{}' (expected one of: {})",
                name,
                templates::TEMPLATE_NAMES.join(", ")
            )
        })?;
        return print_json(&template);
    }

    let mut config = if cli.config.exists() {
        WeftConfig::load(&cli.config)?
    } else {
        WeftConfig::default()
    };
    if let Some(db) = cli.db {
        config.store.path = db;
    }
    info!(db = %config.store_path().display(), "Opening store");
    let engine = WorkflowEngine::open(&config)?;

    match cli.command {
        Commands::Workflow { action } => handle_workflow(&engine, action),
        Commands::Template { .. } => Ok(()),
        Commands::Run { action } => handle_run(&engine, action).await,
        Commands::ResumeDue { exec } => {
            let resumed = engine.resume_due_runs()?;
            if !exec {
                return print_json(&resumed);
            }
            let mut reports = Vec::new();
            for run_id in &resumed {
                match engine.execute_run(run_id).await {
                    Ok(report) => reports.push(serde_json::to_value(report)?),
                    Err(e) => {
                        warn!(run_id = %run_id, error = %e, "Resumed run could not be executed");
                        reports.push(json!({ "run_id": run_id, "error": e.to_string() }));
                    }
                }
            }
            print_json(&reports)
        }
        Commands::Audit {
            workflow,
            run,
            limit,
        } => print_json(&engine.get_audit_log(workflow.as_deref(), run.as_deref(), limit)?),
        Commands::Stats { workflow } => print_json(&engine.stats(workflow.as_deref())?),
    }
}

fn handle_workflow(engine: &WorkflowEngine, action: WorkflowAction) -> anyhow::Result<()> {
    match action {
        WorkflowAction::Create {
            file,
            template,
            name,
        } => {
            let mut new = match (file, template) {
                (Some(path), _) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    serde_json::from_str::<NewWorkflow>(&text)
                        .with_context(|| format!("Invalid workflow JSON in {}", path.display()))?
                }
                (None, Some(template)) => templates::by_name(&template)
                    .with_context(|| format!("Unknown template '{}'", template))?,
                (None, None) => bail!("Pass --file <path> or --template <name>"),
            };
            if let Some(name) = name {
                new.name = name;
            }
            print_json(&engine.create_workflow(new)?)
        }
        WorkflowAction::List { status, tag, limit } => {
            print_json(&engine.list_workflows(status, tag.as_deref(), limit)?)
        }
        WorkflowAction::Show { id } => match engine.get_workflow(&id)? {
            Some(workflow) => print_json(&workflow),
            None => bail!("Workflow not found: {}", id),
        },
        WorkflowAction::Activate { id } => print_changed("activated", engine.activate_workflow(&id)?),
        WorkflowAction::Pause { id } => print_changed("paused", engine.pause_workflow(&id)?),
        WorkflowAction::Delete { id } => print_changed("deleted", engine.delete_workflow(&id)?),
    }
}

async fn handle_run(engine: &WorkflowEngine, action: RunAction) -> anyhow::Result<()> {
    match action {
        RunAction::Start {
            workflow_id,
            trigger,
            exec,
        } => {
            let trigger: Value = match trigger {
                Some(raw) => serde_json::from_str(&raw).context("Invalid --trigger JSON")?,
                None => Value::Null,
            };
            let run_id = match engine.start_run(&workflow_id, trigger)? {
                Some(id) => id,
                None => {
                    return print_json(&json!({
                        "run_id": null,
                        "reason": "workflow missing, inactive, or over its hourly run limit",
                    }));
                }
            };
            if exec {
                print_json(&engine.execute_run(&run_id).await?)
            } else {
                print_json(&json!({ "run_id": run_id }))
            }
        }
        RunAction::Exec { run_id } => print_json(&engine.execute_run(&run_id).await?),
        RunAction::Show { run_id } => match engine.get_run(&run_id)? {
            Some(run) => print_json(&run),
            None => bail!("Run not found: {}", run_id),
        },
        RunAction::List {
            workflow,
            status,
            limit,
        } => print_json(&engine.list_runs(workflow.as_deref(), status, limit)?),
        RunAction::Cancel { run_id } => print_changed("cancelled", engine.cancel_run(&run_id)?),
    }
}

fn print_changed(key: &str, changed: bool) -> anyhow::Result<()> {
    print_json(&json!({ key: changed }))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
