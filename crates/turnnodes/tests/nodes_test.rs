// crates/turnnodes/tests/nodes_test.rs

use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use turncore::{FlowError, NodeError, Step, Workflow};
use turnnodes::builtin_handlers;
use turnruntime::WorkflowEngine;

fn load(json: serde_json::Value) -> Workflow {
    serde_json::from_value(json).expect("workflow should parse")
}

#[tokio::test]
async fn test_agents_alternate_through_templates() {
    let workflow = load(json!({
        "id": "debate",
        "nodes": [
            {"id": "alice", "type": "transform.template",
             "parameters": {"template": "alice r{{__round}} after [{{__output_bob}}]"}},
            {"id": "bob", "type": "transform.template",
             "parameters": {"template": "bob r{{__round}} after [{{__output_alice}}]"}}
        ],
        "edges": [
            {"id": "e1", "source": "alice", "target": "bob"},
            {"id": "e2", "source": "bob", "target": "alice"}
        ],
        "maxRounds": 2
    }));

    let outcome = WorkflowEngine::default()
        .run_workflow(&workflow, &builtin_handlers(), None)
        .await
        .unwrap();

    assert_eq!(
        outcome.output,
        Some(json!("bob r1 after [alice r1 after [bob r0 after [alice r0 after []]]]"))
    );
}

#[tokio::test]
async fn test_context_set_feeds_later_levels() {
    let workflow = load(json!({
        "id": "greeting",
        "nodes": [
            {"id": "store", "type": "context.set", "config": {"key": "name", "value": "Ada"}},
            {"id": "log", "type": "debug.log", "parameters": {"message": "starting"}},
            {"id": "greet", "type": "transform.template", "parameters": {"template": "hi {{ name }}"}}
        ]
    }))
    .with_execution_order(vec![Step::parallel(["store", "log"]), Step::node("greet")]);

    let outcome = WorkflowEngine::default()
        .run_workflow(&workflow, &builtin_handlers(), None)
        .await
        .unwrap();

    assert_eq!(outcome.output, Some(json!("hi Ada")));
    assert_eq!(outcome.context["name"], json!("Ada"));
    assert_eq!(outcome.context["__output_log"], json!("starting"));
}

#[tokio::test]
async fn test_delay_honours_cancellation() {
    let workflow = load(json!({
        "id": "slow",
        "nodes": [{"id": "wait", "type": "time.delay", "parameters": {"delay_ms": 10000}}]
    }));
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(2),
        WorkflowEngine::default()
            .with_cancellation(token)
            .run_workflow(&workflow, &builtin_handlers(), None),
    )
    .await
    .expect("delay should stop once cancelled")
    .unwrap_err();

    assert!(matches!(err, FlowError::Node(NodeError::Cancelled)));
}

#[test]
fn test_builtin_handlers_are_listed() {
    let handlers = builtin_handlers();
    assert_eq!(
        handlers.list_node_types(),
        vec!["context.set", "debug.log", "time.delay", "transform.echo", "transform.template"]
    );
    assert_eq!(handlers.get_metadata("time.delay").unwrap().category, "time");
}
