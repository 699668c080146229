mod common;

use common::{compile, engine_with};
use floowsynk::runtime::audit::NodeStatus;
use floowsynk::runtime::RunStatus;
use floowsynk::workflow::ExecutionContext;
use serde_json::{json, Value};

fn manual(workflow_id: &str) -> ExecutionContext {
    ExecutionContext::manual(workflow_id.to_string())
}

fn seeded(workflow_id: &str, variables: Value) -> ExecutionContext {
    let Value::Object(map) = variables else {
        panic!("variables must be an object");
    };
    manual(workflow_id).with_variables(map)
}

#[tokio::test]
async fn math_result_flows_into_text() {
    let workflow = compile(json!({
        "id": "calc",
        "name": "Calc",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "math", "data": { "expression": "1 + 2", "variable": "x" } },
            { "id": "2", "type": "text", "data": { "message": "Result: {{x}}", "variable": "y" } }
        ],
        "edges": [
            { "id": "e1", "source": "0", "target": "1" },
            { "id": "e2", "source": "1", "target": "2" }
        ]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("calc")).await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.variables["x"], "3");
    assert_eq!(result.variables["y"], "Result: 3");
    assert_eq!(result.value("y"), Some(&json!("Result: 3")));
}

#[tokio::test]
async fn condition_only_follows_the_selected_branch() {
    let workflow = compile(json!({
        "id": "branching",
        "name": "Branching",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "condition", "data": { "expression": "{{a}} > 5" } },
            { "id": "2", "type": "setVariable", "data": { "name": "taken", "value": "yes" } },
            { "id": "3", "type": "setVariable", "data": { "name": "skipped", "value": "yes" } }
        ],
        "edges": [
            { "id": "e1", "source": "0", "target": "1" },
            { "id": "e2", "source": "1", "sourceHandle": "True", "target": "2" },
            { "id": "e3", "source": "1", "sourceHandle": "False", "target": "3" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, seeded("branching", json!({ "a": 10 }))).await;

    assert!(result.is_success());
    assert_eq!(result.variables.get("taken").map(String::as_str), Some("yes"));
    assert!(!result.variables.contains_key("skipped"));
    assert!(sink.records().iter().all(|r| r.node_id != "3"));

    let (engine, _) = engine_with(&[]);
    let result = engine.run(&workflow, seeded("branching", json!({ "a": 2 }))).await;
    assert!(result.variables.contains_key("skipped"));
    assert!(!result.variables.contains_key("taken"));
}

#[tokio::test]
async fn unevaluable_condition_takes_false_branch() {
    let workflow = compile(json!({
        "id": "broken-condition",
        "name": "Broken condition",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "condition", "data": { "expression": "{{missing}} >" } },
            { "id": "2", "type": "setVariable", "data": { "name": "branch", "value": "true" } },
            { "id": "3", "type": "setVariable", "data": { "name": "branch", "value": "false" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "True", "target": "2" },
            { "source": "1", "sourceHandle": "False", "target": "3" }
        ]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("broken-condition")).await;

    assert!(result.is_success());
    assert_eq!(result.variables["branch"], "false");
}

#[tokio::test]
async fn condition_rendering_to_nothing_fails_the_run() {
    let workflow = compile(json!({
        "id": "empty-condition",
        "name": "Empty condition",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "condition", "data": { "expression": "{{missing}}" } },
            { "id": "2", "type": "setVariable", "data": { "name": "branch", "value": "false" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "False", "target": "2" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, manual("empty-condition")).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.as_ref().map(|e| e.node_id.as_str()), Some("1"));
    assert!(!result.variables.contains_key("branch"));
    assert!(sink.records().iter().all(|r| r.node_id != "2"));
}

#[tokio::test]
async fn oversized_rendered_expression_fails_only_that_run() {
    let workflow = compile(json!({
        "id": "nested",
        "name": "Nested",
        "nodes": [
            { "id": "0", "type": "webhook" },
            { "id": "1", "type": "math", "data": { "expression": "{{input}} + 1", "variable": "x" } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let (engine, _) = engine_with(&[]);

    let payload = json!(format!("{}1", "(".repeat(20_000)));
    let context = ExecutionContext::from_webhook_data("nested".to_string(), payload);
    let result = engine.run(&workflow, context).await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.error.expect("parse error");
    assert_eq!(error.node_id, "1");
    assert!(error.message.contains("nested too deeply"));
}

#[tokio::test]
async fn loop_runs_body_then_continues_once() {
    let workflow = compile(json!({
        "id": "counter",
        "name": "Counter",
        "nodes": [
            { "id": "0", "type": "setVariable", "data": { "name": "i", "value": 0 } },
            { "id": "1", "type": "loop", "data": { "iteration": 3 } },
            { "id": "2", "type": "math", "data": { "expression": "{{i}} + 1", "variable": "i" } },
            { "id": "3", "type": "text", "data": { "message": "done {{i}}", "variable": "done" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "output", "target": "2" },
            { "source": "1", "target": "3" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, manual("counter")).await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.variables["i"], "3");
    assert_eq!(result.variables["done"], "done 3");

    let records = sink.records();
    let body_runs: Vec<&str> = records
        .iter()
        .filter(|r| r.node_id == "2" && r.status == NodeStatus::Completed)
        .map(|r| r.variables["i"].as_str())
        .collect();
    assert_eq!(body_runs, vec!["1", "2", "3"]);

    let continuation = records
        .iter()
        .filter(|r| r.node_id == "3" && r.status == NodeStatus::Completed)
        .count();
    assert_eq!(continuation, 1);
}

#[tokio::test]
async fn foreach_visits_items_in_order() {
    let workflow = compile(json!({
        "id": "letters",
        "name": "Letters",
        "nodes": [
            { "id": "0", "type": "list", "data": {
                "variable": "letters",
                "list": { "type": "string", "stringItems": ["a", "b"] }
            } },
            { "id": "1", "type": "setVariable", "data": { "name": "acc", "value": "" } },
            { "id": "2", "type": "foreach", "data": { "listVariable": "letters" } },
            { "id": "3", "type": "text", "data": { "message": "{{acc}}{{letters.item}}", "variable": "acc" } },
            { "id": "4", "type": "text", "data": { "message": "{{input}}", "variable": "last" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "target": "2" },
            { "source": "2", "sourceHandle": "output", "target": "3" },
            { "source": "3", "target": "4" }
        ]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("letters")).await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.variables["acc"], "ab");
    assert_eq!(result.variables["letters.item"], "b");
    assert_eq!(result.variables["last"], "ab");
}

#[tokio::test]
async fn foreach_over_non_list_fails() {
    let workflow = compile(json!({
        "id": "bad-foreach",
        "name": "Bad foreach",
        "nodes": [
            { "id": "0", "type": "setVariable", "data": { "name": "letters", "value": "abc" } },
            { "id": "1", "type": "foreach", "data": { "listVariable": "letters" } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("bad-foreach")).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.map(|e| e.node_id), Some("1".to_string()));
}

#[tokio::test]
async fn while_stops_at_limit() {
    let workflow = compile(json!({
        "id": "bounded",
        "name": "Bounded",
        "nodes": [
            { "id": "0", "type": "setVariable", "data": { "name": "n", "value": 0 } },
            { "id": "1", "type": "while", "data": { "expression": "{{n}} < 100", "limit": 3 } },
            { "id": "2", "type": "math", "data": { "expression": "{{n}} + 1", "variable": "n" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "output", "target": "2" }
        ]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("bounded")).await;

    assert!(result.is_success());
    assert_eq!(result.variables["n"], "3");
}

#[tokio::test]
async fn while_stops_when_condition_turns_false() {
    let workflow = compile(json!({
        "id": "until-two",
        "name": "Until two",
        "nodes": [
            { "id": "0", "type": "setVariable", "data": { "name": "n", "value": 0 } },
            { "id": "1", "type": "while", "data": { "expression": "{{n}} < 2", "limit": 50 } },
            { "id": "2", "type": "math", "data": { "expression": "{{n}} + 1", "variable": "n" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "output", "target": "2" }
        ]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("until-two")).await;

    assert_eq!(result.variables["n"], "2");
}

#[tokio::test]
async fn subprocess_writes_are_visible_to_parent() {
    let child = compile(json!({
        "id": "child",
        "name": "Child",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "setVariable", "data": { "name": "x", "value": 42 } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let parent = compile(json!({
        "id": "parent",
        "name": "Parent",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "subprocess", "data": { "subProcessId": "child" } },
            { "id": "2", "type": "text", "data": { "message": "x={{x}}", "variable": "y" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "target": "2" }
        ]
    }));
    let (engine, sink) = engine_with(&[child]);

    let result = engine.run(&parent, manual("parent")).await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.variables["x"], "42");
    assert_eq!(result.variables["y"], "x=42");

    let records = sink.records();
    assert!(records
        .iter()
        .filter(|r| r.subprocess_id.as_deref() == Some("child"))
        .any(|r| r.node_id == "1" && r.node_type == "setVariable"));
    assert!(records.iter().all(|r| r.workflow_id == "parent"));
}

#[tokio::test]
async fn missing_subprocess_fails_at_caller() {
    let parent = compile(json!({
        "id": "orphan",
        "name": "Orphan",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "subprocess", "data": { "subProcessId": "nowhere" } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&parent, manual("orphan")).await;

    let error = result.error.expect("run should fail");
    assert_eq!(error.node_id, "1");
    assert!(error.message.contains("nowhere"));
}

#[tokio::test]
async fn recursive_subprocess_hits_depth_guard() {
    let looping = compile(json!({
        "id": "self",
        "name": "Self",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "subprocess", "data": { "subProcessId": "self" } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let (engine, _) = engine_with(&[looping.clone()]);

    let result = engine.run(&looping, manual("self")).await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.error.expect("depth error");
    assert_eq!(error.workflow_id, "self");
    assert!(error.message.contains("nesting"));
}

#[tokio::test]
async fn failure_reports_node_and_keeps_earlier_variables() {
    let workflow = compile(json!({
        "id": "divide",
        "name": "Divide",
        "nodes": [
            { "id": "0", "type": "setVariable", "data": { "name": "a", "value": 1 } },
            { "id": "1", "type": "math", "data": { "expression": "{{a}} / 0", "variable": "b" } },
            { "id": "2", "type": "text", "data": { "message": "unreachable", "variable": "c" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "target": "2" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, manual("divide")).await;

    assert_eq!(result.status, RunStatus::Failed);
    let error = result.error.as_ref().expect("failure details");
    assert_eq!(error.node_id, "1");
    assert_eq!(error.workflow_id, "divide");
    assert_eq!(result.variables["a"], "1");
    assert!(!result.variables.contains_key("c"));

    let last = sink.records().pop().expect("records");
    assert_eq!(last.node_id, "1");
    assert_eq!(last.status, NodeStatus::Failed);
}

#[tokio::test]
async fn body_failure_names_body_node_and_marks_loop_failed() {
    let workflow = compile(json!({
        "id": "bad-body",
        "name": "Bad body",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "loop", "data": { "iteration": 2 } },
            { "id": "2", "type": "replace", "data": {
                "text": "abc", "pattern": "(", "replaceText": "", "variable": "r"
            } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "output", "target": "2" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, manual("bad-body")).await;

    assert_eq!(result.error.map(|e| e.node_id), Some("2".to_string()));

    let failed: Vec<String> = sink
        .records()
        .into_iter()
        .filter(|r| r.status == NodeStatus::Failed)
        .map(|r| r.node_id)
        .collect();
    assert_eq!(failed, vec!["2".to_string(), "1".to_string()]);
}

#[tokio::test]
async fn unknown_node_type_fails_the_run() {
    let workflow = compile(json!({
        "id": "mystery",
        "name": "Mystery",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "teleport", "data": { "to": "mars" } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("mystery")).await;

    let error = result.error.expect("unknown type error");
    assert_eq!(error.node_id, "1");
    assert!(error.message.contains("teleport"));
}

#[tokio::test]
async fn successors_run_depth_first_in_edge_order() {
    let workflow = compile(json!({
        "id": "fanout",
        "name": "Fanout",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "a", "type": "log", "data": { "message": "a" } },
            { "id": "a1", "type": "log", "data": { "message": "a1" } },
            { "id": "b", "type": "log", "data": { "message": "b" } }
        ],
        "edges": [
            { "source": "0", "target": "a" },
            { "source": "0", "target": "b" },
            { "source": "a", "target": "a1" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, manual("fanout")).await;
    assert!(result.is_success());

    let order: Vec<String> = sink
        .records()
        .into_iter()
        .filter(|r| r.status == NodeStatus::Running)
        .map(|r| r.node_id)
        .collect();
    assert_eq!(order, vec!["0", "a", "a1", "b"]);
}

#[tokio::test]
async fn audit_records_are_sequenced_per_run() {
    let workflow = compile(json!({
        "id": "audited",
        "name": "Audited",
        "nodes": [
            { "id": "0", "type": "defaultnode" },
            { "id": "1", "type": "loop", "data": { "iteration": 2 } },
            { "id": "2", "type": "getGuid", "data": { "variable": "id" } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "sourceHandle": "output", "target": "2" }
        ]
    }));
    let (engine, sink) = engine_with(&[]);

    let result = engine.run(&workflow, manual("audited")).await;
    let records = sink.records();

    assert!(!records.is_empty());
    assert_eq!(records[0].node_id, "0");
    assert_eq!(records[0].status, NodeStatus::Running);
    for (expected, record) in records.iter().enumerate() {
        assert_eq!(record.sequence, expected as u64);
        assert_eq!(record.process_id, result.process_id);
    }
    assert_eq!(
        records.iter().filter(|r| r.status == NodeStatus::Info && r.node_id == "1").count(),
        2
    );
    assert_eq!(result.variables["id"].len(), 32);
}

#[tokio::test]
async fn webhook_payload_is_the_first_input() {
    let workflow = compile(json!({
        "id": "hook",
        "name": "Hook",
        "nodes": [
            { "id": "0", "type": "webhook" },
            { "id": "1", "type": "text", "data": { "message": "Hi {{input.name}}", "variable": "greeting" } }
        ],
        "edges": [{ "source": "0", "target": "1" }]
    }));
    let (engine, _) = engine_with(&[]);

    let context = ExecutionContext::from_webhook_data("hook".to_string(), json!({ "name": "Ada" }));
    let result = engine.run(&workflow, context).await;

    assert!(result.is_success());
    assert_eq!(result.variables["greeting"], "Hi Ada");
}

#[tokio::test]
async fn list_helpers_chain_through_scope() {
    let workflow = compile(json!({
        "id": "people",
        "name": "People",
        "nodes": [
            { "id": "0", "type": "list", "data": {
                "variable": "people",
                "list": { "type": "keyValue", "keyValueItems": [
                    { "key": "ada", "value": "1815" },
                    { "key": "alan", "value": "1912" }
                ] }
            } },
            { "id": "1", "type": "count", "data": { "listVariable": "people", "variable": "total" } },
            { "id": "2", "type": "map", "data": {
                "listVariable": "people", "template": "{{key}}-{{value}}", "variable": "labels"
            } },
            { "id": "3", "type": "findAll", "data": {
                "text": "{{labels}}", "pattern": "[0-9]{4}", "variable": "years"
            } }
        ],
        "edges": [
            { "source": "0", "target": "1" },
            { "source": "1", "target": "2" },
            { "source": "2", "target": "3" }
        ]
    }));
    let (engine, _) = engine_with(&[]);

    let result = engine.run(&workflow, manual("people")).await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.variables["total"], "2");
    assert_eq!(result.value("labels"), Some(&json!(["ada-1815", "alan-1912"])));
    assert_eq!(result.value("years"), Some(&json!(["1815", "1912"])));
}
