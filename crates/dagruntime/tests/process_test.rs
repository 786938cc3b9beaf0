#![cfg(unix)]

mod common;

use dagcore::{
    EventBus, ExecutionEvent, ExecutionId, LogLevel, NodeError, NodeSpec, Params, PortValues,
    WorkflowGraph,
};
use dagruntime::{
    ComponentRegistry, Invocation, NodeExecutor, NodeStatus, ProcessExecutor, RunOptions,
    WorkflowExecutor,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Register a script component whose command is `sh -c <script>`.
fn script_registry(dir: &Path, script: &str) -> ComponentRegistry {
    let body = json!({
        "category": "shell",
        "name": "Script",
        "outputs": [{"name": "x"}, {"name": "cwd"}],
        "command": ["sh", "-c", script]
    });
    std::fs::write(dir.join("script.component.json"), body.to_string()).unwrap();
    let mut registry = ComponentRegistry::new();
    let report = registry.scan(dir);
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    registry
}

fn invocation(registry: &ComponentRegistry, bus: &EventBus, inputs: PortValues) -> Invocation {
    let registered = registry.get("shell/Script").unwrap();
    Invocation {
        node_id: "n1".to_string(),
        descriptor: registered.descriptor.clone(),
        source: registered.source.clone(),
        params: Params::default(),
        inputs,
        globals: HashMap::new(),
        environment: Default::default(),
        program: None,
        events: bus.create_emitter(ExecutionId::new_v4(), "n1".to_string()),
        cancellation: CancellationToken::new(),
    }
}

#[tokio::test]
async fn test_script_round_trip_over_stdio() {
    let dir = tempfile::tempdir().unwrap();
    // Echo the request's inputs back as the result.
    let script = r#"
        req=$(cat)
        echo '{"type":"log","level":"warn","message":"from child"}'
        echo '{"type":"set_global","key":"seen","value":true}'
        echo "not a protocol line"
        inputs=$(printf '%s' "$req" | sed -e 's/.*"inputs":\({[^}]*}\).*/\1/')
        printf '{"type":"result","outputs":{"x":%s,"cwd":"%s"}}\n' "$inputs" "$(pwd)"
    "#;
    let registry = script_registry(dir.path(), script);
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    let inputs = PortValues::from([("v".to_string(), json!([1, 2.5, "three", null]))]);
    let outcome = ProcessExecutor::new("unused")
        .invoke(invocation(&registry, &bus, inputs))
        .await;

    let outputs = outcome.result.unwrap();
    assert_eq!(outputs["x"], json!({"v": [1, 2.5, "three", null]}));
    assert_eq!(
        Path::new(outputs["cwd"].as_str().unwrap()).canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
    assert_eq!(outcome.global_writes, vec![("seen".to_string(), json!(true))]);

    match rx.try_recv().unwrap() {
        ExecutionEvent::NodeLog { level, message, .. } => {
            assert_eq!(level, LogLevel::Warn);
            assert_eq!(message, "from child");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_child_error_message_maps_to_kind() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"cat > /dev/null; echo '{"type":"error","kind":"execution","message":"bad row","trace":"line 4"}'"#;
    let registry = script_registry(dir.path(), script);
    let bus = EventBus::new(16);

    let outcome = ProcessExecutor::new("unused")
        .invoke(invocation(&registry, &bus, PortValues::new()))
        .await;
    assert_eq!(
        outcome.result.unwrap_err(),
        NodeError::ExecutionFailed("bad row\nline 4".to_string())
    );
}

#[tokio::test]
async fn test_import_failure_detected_from_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = "cat > /dev/null; echo \"ModuleNotFoundError: No module named 'numpy'\" >&2; exit 1";
    let registry = script_registry(dir.path(), script);
    let bus = EventBus::new(16);

    let outcome = ProcessExecutor::new("unused")
        .invoke(invocation(&registry, &bus, PortValues::new()))
        .await;
    match outcome.result {
        Err(NodeError::Import(message)) => assert!(message.contains("numpy")),
        other => panic!("expected an import failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exit_without_result_is_execution_failure() {
    let dir = tempfile::tempdir().unwrap();
    let registry = script_registry(dir.path(), "cat > /dev/null; echo oops >&2; exit 3");
    let bus = EventBus::new(16);

    let outcome = ProcessExecutor::new("unused")
        .invoke(invocation(&registry, &bus, PortValues::new()))
        .await;
    match outcome.result {
        Err(NodeError::ExecutionFailed(message)) => assert!(message.contains("oops")),
        other => panic!("expected an execution failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_result_is_serialization_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = r#"cat > /dev/null; echo '{"type":"result","outputs":[1,2]}'"#;
    let registry = script_registry(dir.path(), script);
    let bus = EventBus::new(16);

    let outcome = ProcessExecutor::new("unused")
        .invoke(invocation(&registry, &bus, PortValues::new()))
        .await;
    assert!(matches!(outcome.result, Err(NodeError::Serialization(_))));
}

#[tokio::test]
async fn test_timeout_kills_child() {
    let dir = tempfile::tempdir().unwrap();
    let registry = script_registry(dir.path(), "sleep 5");
    let bus = EventBus::new(16);

    let started = std::time::Instant::now();
    let outcome = ProcessExecutor::new("unused")
        .with_timeout(Some(Duration::from_millis(200)))
        .invoke(invocation(&registry, &bus, PortValues::new()))
        .await;
    match outcome.result {
        Err(e @ NodeError::Timeout { .. }) => assert_eq!(e.to_string(), "Timeout after 200ms"),
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_environment_program_replaces_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let registry = script_registry(dir.path(), "exit 9");
    let bus = EventBus::new(16);

    let mut inv = invocation(&registry, &bus, PortValues::new());
    inv.program = Some(dir.path().join("no-such-interpreter"));
    let outcome = ProcessExecutor::new("unused").invoke(inv).await;
    assert!(matches!(outcome.result, Err(NodeError::Import(_))));
}

#[tokio::test]
async fn test_builtins_ignore_interpreter_override() {
    // Stand-in worker: answers every request with x = 5.
    let worker = ProcessExecutor::new("sh").with_worker_args([
        "-c",
        r#"cat > /dev/null; echo '{"type":"result","outputs":{"x":5}}'"#,
    ]);
    let executor = WorkflowExecutor::new(Arc::new(common::registry()), Arc::new(worker));

    let dir = tempfile::tempdir().unwrap();
    let mut workflow = WorkflowGraph::new();
    workflow.environment = Some(dir.path().join("python-that-does-not-exist"));
    workflow.add_node(NodeSpec::new("a", "test/Source").with_environment(dir.path().join("nope")));
    workflow.add_node(NodeSpec::new("b", "test/Source"));

    let result = executor
        .execute(&workflow, RunOptions::new(), &EventBus::new(16))
        .await
        .unwrap();

    for node in ["a", "b"] {
        assert_eq!(result.reports[node].status, NodeStatus::Succeeded, "{:?}", result.reports[node]);
        assert_eq!(result.output(node, "x"), Some(&json!(5)));
    }
}
