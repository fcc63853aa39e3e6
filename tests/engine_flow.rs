use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Value};

use weft_actions::{ActionKind, ActionRegistry};
use weft_core::clock::{Clock, ManualClock};
use weft_core::config::{DelayMode, EngineConfig, WeftConfig};
use weft_core::error::WeftError;
use weft_core::node::Node;
use weft_core::types::{NewWorkflow, RunStatus, StepStatus};
use weft_engine::{templates, WorkflowEngine};
use weft_store::SqliteStore;

fn visited(log: &[weft_core::types::Step]) -> Vec<&str> {
    log.iter().map(|s| s.node_id.as_str()).collect()
}

fn engine_with(config: EngineConfig, clock: Arc<ManualClock>) -> WorkflowEngine {
    WorkflowEngine::new(
        Arc::new(SqliteStore::in_memory().unwrap()),
        ActionRegistry::with_builtins(),
        config,
    )
    .with_clock(clock)
}

fn register_platform_stubs(engine: &mut WorkflowEngine) {
    let actions = engine.actions_mut();
    for kind in [ActionKind::Dm, ActionKind::Like, ActionKind::Reply, ActionKind::Tweet] {
        actions.register_fn(kind, move |config, _ctx| {
            Ok(json!({
                "action": kind.as_str(),
                "text": config.get("text").cloned().unwrap_or(Value::Null),
            }))
        });
    }
}

#[tokio::test]
async fn test_welcome_template_takes_vip_and_regular_paths() {
    let mut engine = WorkflowEngine::in_memory().unwrap();
    register_platform_stubs(&mut engine);

    let wf = engine.create_workflow(templates::welcome_dm()).unwrap();
    assert!(engine.activate_workflow(&wf.id).unwrap());

    let vip = engine
        .start_run(&wf.id, json!({"follower_count": 5000}))
        .unwrap()
        .unwrap();
    let report = engine.execute_run(&vip).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(visited(&report.log), vec!["check", "dm_vip", "end"]);
    assert_eq!(
        report.context.get("last_action_result").and_then(|r| r.get("action")),
        Some(&json!("dm"))
    );

    let regular = engine
        .start_run(&wf.id, json!({"follower_count": 50}))
        .unwrap()
        .unwrap();
    let report = engine.execute_run(&regular).await.unwrap();
    assert_eq!(visited(&report.log), vec!["check", "dm_regular", "end"]);
}

#[tokio::test]
async fn test_template_without_platform_handler_fails_loudly() {
    let engine = WorkflowEngine::in_memory().unwrap();
    let wf = engine.create_workflow(templates::welcome_dm()).unwrap();
    let run_id = engine
        .start_run(&wf.id, json!({"follower_count": 5}))
        .unwrap()
        .unwrap();

    let report = engine.execute_run(&run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.log.last().map(|s| s.status), Some(StepStatus::Error));
    assert!(report.error.unwrap().contains("dm"));
}

#[tokio::test]
async fn test_engagement_boost_negative_path_uses_builtins_only() {
    let engine = WorkflowEngine::in_memory().unwrap();
    let wf = engine.create_workflow(templates::engagement_boost()).unwrap();
    let run_id = engine
        .start_run(&wf.id, json!({"sentiment": 0.1}))
        .unwrap()
        .unwrap();

    let report = engine.execute_run(&run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(visited(&report.log), vec!["sentiment", "log_negative", "end"]);
}

#[tokio::test]
async fn test_content_pipeline_publishes() {
    let mut engine = WorkflowEngine::in_memory().unwrap();
    register_platform_stubs(&mut engine);
    let wf = engine.create_workflow(templates::content_pipeline()).unwrap();
    let run_id = engine.start_run(&wf.id, Value::Null).unwrap().unwrap();

    let report = engine.execute_run(&run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(
        visited(&report.log),
        vec!["fetch", "check_content", "publish", "log_success", "end"]
    );
}

#[test]
fn test_rate_limit_over_rolling_hour() {
    let clock = Arc::new(ManualClock::default());
    let engine = engine_with(EngineConfig::default(), clock.clone());
    let wf = engine
        .create_workflow(templates::welcome_dm().with_max_runs_per_hour(2))
        .unwrap();

    assert!(engine.start_run(&wf.id, Value::Null).unwrap().is_some());
    assert!(engine.start_run(&wf.id, Value::Null).unwrap().is_some());
    assert!(engine.start_run(&wf.id, Value::Null).unwrap().is_none());

    clock.advance(Duration::minutes(59));
    assert!(engine.start_run(&wf.id, Value::Null).unwrap().is_none());

    clock.advance(Duration::minutes(2));
    assert!(engine.start_run(&wf.id, Value::Null).unwrap().is_some());
}

#[tokio::test]
async fn test_loop_with_suspending_body_resumes_across_calls() {
    let clock = Arc::new(ManualClock::default());
    let config = EngineConfig {
        delay_mode: DelayMode::Suspend,
        ..Default::default()
    };
    let engine = engine_with(config, clock.clone());

    let wf = engine
        .create_workflow(
            NewWorkflow::new("Drip per item")
                .with_variable("items", json!(["a", "b"]))
                .with_nodes(vec![
                    Node::loop_over("each", "items", "item", "wait").with_next("end"),
                    Node::delay("wait", 10).with_next("work"),
                    Node::action("work", "log", json!({"message": "item {{item}}"})).with_next("each"),
                    Node::end("end"),
                ]),
        )
        .unwrap();
    let run_id = engine.start_run(&wf.id, Value::Null).unwrap().unwrap();

    let mut report = engine.execute_run(&run_id).await.unwrap();
    let mut calls = 1;
    while report.status == RunStatus::Waiting {
        let stored = engine.get_run(&run_id).unwrap().unwrap();
        assert!(!stored.loop_cursors.is_empty());
        assert!(!stored.context.contains_key("each"));

        clock.advance(Duration::seconds(11));
        assert_eq!(engine.resume_due_runs().unwrap(), vec![run_id.clone()]);
        report = engine.execute_run(&run_id).await.unwrap();
        calls += 1;
    }

    assert_eq!(calls, 3);
    assert_eq!(report.status, RunStatus::Completed);
    let work: Vec<_> = report
        .log
        .iter()
        .filter(|s| s.node_id == "work")
        .filter_map(|s| s.result.clone())
        .collect();
    assert_eq!(
        work,
        vec![json!({"logged": "item a"}), json!({"logged": "item b"})]
    );
    assert!(engine.get_run(&run_id).unwrap().unwrap().loop_cursors.is_empty());
}

#[tokio::test]
async fn test_file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = WeftConfig::default();
    config.store.path = dir.path().join("weft.db").display().to_string();

    let (wf_id, run_id) = {
        let engine = WorkflowEngine::open(&config).unwrap();
        let wf = engine
            .create_workflow(
                NewWorkflow::new("Persisted")
                    .with_tags(vec!["ops".into()])
                    .with_nodes(vec![
                        Node::action("hello", "log", json!({"message": "hi"})).with_next("end"),
                        Node::end("end"),
                    ]),
            )
            .unwrap();
        let run_id = engine.start_run(&wf.id, Value::Null).unwrap().unwrap();
        (wf.id, run_id)
    };

    let engine = WorkflowEngine::open(&config).unwrap();
    let listed = engine.list_workflows(None, Some("ops"), None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, wf_id);

    let report = engine.execute_run(&run_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.steps, 2);
}

#[tokio::test]
async fn test_corrupt_run_is_readable_but_not_executable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weft.db");
    let mut config = WeftConfig::default();
    config.store.path = path.display().to_string();

    let engine = WorkflowEngine::open(&config).unwrap();
    let wf = engine
        .create_workflow(NewWorkflow::new("Corrupt").with_nodes(vec![Node::end("end")]))
        .unwrap();
    let run_id = engine.start_run(&wf.id, Value::Null).unwrap().unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "UPDATE workflow_runs SET context = '{oops' WHERE run_id = ?1",
        [&run_id],
    )
    .unwrap();

    let run = engine.get_run(&run_id).unwrap().unwrap();
    assert!(!run.is_intact());
    assert_eq!(run.raw_fields[0].field, "context");
    assert_eq!(run.raw_fields[0].raw, "{oops");
    assert_eq!(engine.list_runs(Some(&wf.id), None, None).unwrap().len(), 1);

    let err = engine.execute_run(&run_id).await.unwrap_err();
    assert!(matches!(err, WeftError::CorruptRecord { ref field, .. } if field == "context"));
}

#[tokio::test]
async fn test_audit_trail_for_full_lifecycle() {
    let clock = Arc::new(ManualClock::default());
    let engine = engine_with(EngineConfig::default(), clock.clone());
    let wf = engine
        .create_workflow(NewWorkflow::new("Audited").with_nodes(vec![
            Node::action("a", "log", json!({})).with_next("end"),
            Node::end("end"),
        ]))
        .unwrap();

    clock.advance(Duration::seconds(1));
    engine.activate_workflow(&wf.id).unwrap();
    clock.advance(Duration::seconds(1));
    let run_id = engine.start_run(&wf.id, Value::Null).unwrap().unwrap();
    clock.advance(Duration::seconds(1));
    engine.execute_run(&run_id).await.unwrap();

    let mut events: Vec<_> = engine
        .get_audit_log(Some(&wf.id), None, None)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    events.reverse();
    assert_eq!(
        events,
        vec![
            "workflow_created",
            "workflow_updated",
            "run_started",
            "step_executed",
            "step_executed",
            "run_completed",
        ]
    );

    let limited = engine.get_audit_log(Some(&wf.id), None, Some(2)).unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].event_type, "run_completed");
    assert!(clock.now() >= limited[0].created_at);
}

#[tokio::test]
async fn test_unsaved_run_leaves_no_step_audit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weft.db");
    let mut config = WeftConfig::default();
    config.store.path = path.display().to_string();

    let engine = WorkflowEngine::open(&config).unwrap();
    let wf = engine
        .create_workflow(NewWorkflow::new("Read only").with_nodes(vec![
            Node::action("a", "log", json!({"message": "hi"})).with_next("end"),
            Node::end("end"),
        ]))
        .unwrap();
    let run_id = engine.start_run(&wf.id, Value::Null).unwrap().unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER freeze_runs BEFORE UPDATE ON workflow_runs
         BEGIN SELECT RAISE(ABORT, 'runs are frozen'); END;",
    )
    .unwrap();

    assert!(engine.execute_run(&run_id).await.is_err());

    let events: Vec<_> = engine
        .get_audit_log(None, Some(&run_id), None)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(events, vec!["run_started"]);
    assert_eq!(
        engine.get_run(&run_id).unwrap().unwrap().status,
        RunStatus::Running
    );
}
