// crates/chatflow-core/tests/flow_model_test.rs

use chatflow_core::{EdgeCondition, FlowDefinition, FlowError, NodeSpec, WorkflowError};
use std::collections::HashSet;

fn supported(types: &[&str]) -> HashSet<String> {
    types.iter().map(|t| t.to_string()).collect()
}

const EDITOR_FLOW: &str = r#"{
    "id": "flow-1",
    "nodes": [
        { "id": "start", "type": "restful", "data": { "config": {}, "label": "Entry" } },
        { "id": "check", "type": "condition", "data": { "config": { "conditionValue": "hi" } } },
        { "id": "yes", "type": "function", "data": { "config": { "outputParams": "answer" } } },
        { "id": "no", "type": "exit", "data": { "config": {} } }
    ],
    "edges": [
        { "id": "e1", "source": "start", "target": "check", "sourceHandle": null },
        { "id": "e2", "source": "check", "target": "yes", "sourceHandle": "true" },
        { "id": "e3", "source": "check", "target": "no", "sourceHandle": "FALSE" }
    ]
}"#;

#[test]
fn test_parses_editor_document() {
    let flow = FlowDefinition::parse(EDITOR_FLOW).expect("flow should parse");

    assert_eq!(flow.id, "flow-1");
    assert_eq!(flow.nodes.len(), 4);
    assert_eq!(flow.edges.len(), 3);
    assert_eq!(flow.find_node("start").unwrap().display_name(), "Entry");
    assert_eq!(flow.find_node("yes").unwrap().output_key("last_message"), "answer");
    assert_eq!(flow.find_node("yes").unwrap().input_key("last_message"), "last_message");

    assert_eq!(flow.edges[0].condition(), EdgeCondition::Always);
    assert_eq!(flow.edges[1].condition(), EdgeCondition::Branch(true));
    assert_eq!(flow.edges[2].condition(), EdgeCondition::Branch(false));
}

#[test]
fn test_missing_flow_id_gets_generated() {
    let flow = FlowDefinition::parse(r#"{"nodes": [{"id": "a", "type": "start"}], "edges": []}"#)
        .unwrap();
    assert!(!flow.id.is_empty());
}

#[test]
fn test_edge_to_unknown_node_is_malformed() {
    let json = r#"{
        "nodes": [{ "id": "a", "type": "start" }],
        "edges": [{ "source": "a", "target": "ghost" }]
    }"#;

    match FlowDefinition::parse(json) {
        Err(WorkflowError::MalformedGraph(msg)) => assert!(msg.contains("ghost")),
        other => panic!("expected MalformedGraph, got {:?}", other),
    }
}

#[test]
fn test_duplicate_node_ids_are_malformed() {
    let json = r#"{
        "nodes": [{ "id": "a", "type": "start" }, { "id": "a", "type": "exit" }],
        "edges": []
    }"#;

    assert!(matches!(
        FlowDefinition::parse(json),
        Err(WorkflowError::MalformedGraph(_))
    ));
}

#[test]
fn test_entry_nodes_keep_declaration_order() {
    let mut flow = FlowDefinition::new("entries");
    flow.add_node(NodeSpec::new("b", "start"));
    flow.add_node(NodeSpec::new("a", "start"));
    flow.add_node(NodeSpec::new("c", "exit"));
    flow.connect("b", "c");
    flow.connect("a", "c");

    assert_eq!(flow.entry_nodes(), vec!["b".to_string(), "a".to_string()]);
}

#[test]
fn test_cycle_is_reported_by_validation() {
    let mut flow = FlowDefinition::new("cyclic");
    flow.add_node(NodeSpec::new("entry", "start"));
    flow.add_node(NodeSpec::new("x", "function"));
    flow.add_node(NodeSpec::new("y", "function"));
    flow.connect("entry", "x");
    flow.connect("x", "y");
    flow.connect("y", "x");

    assert!(flow.has_cycle());
    let problems = flow.validate(&supported(&["start", "function"]));
    assert_eq!(problems, vec![WorkflowError::CyclicDependency.to_string()]);
}

#[test]
fn test_self_loop_is_a_cycle() {
    let mut flow = FlowDefinition::new("self-loop");
    flow.add_node(NodeSpec::new("entry", "start"));
    flow.add_node(NodeSpec::new("x", "function"));
    flow.connect("entry", "x");
    flow.connect("x", "x");

    assert!(flow.has_cycle());
}

#[test]
fn test_flow_without_entry_node_is_flagged() {
    let mut flow = FlowDefinition::new("ring");
    flow.add_node(NodeSpec::new("a", "function"));
    flow.add_node(NodeSpec::new("b", "function"));
    flow.connect("a", "b");
    flow.connect("b", "a");

    let problems = flow.validate(&supported(&["function"]));
    assert!(problems.iter().any(|p| p.contains("no entry node")), "{:?}", problems);
    assert!(problems.contains(&WorkflowError::CyclicDependency.to_string()), "{:?}", problems);
}

#[test]
fn test_validation_collects_every_problem() {
    let mut flow = FlowDefinition::new("unsupported");
    flow.add_node(NodeSpec::new("a", "start"));
    flow.add_node(NodeSpec::new("b", "teleport"));
    flow.add_node(NodeSpec::new("c", "pdf"));
    flow.connect("a", "b");
    flow.connect("b", "c");

    let problems = flow.validate(&supported(&["start"]));
    let unsupported = |node_type: &str, node_id: &str| {
        FlowError::UnsupportedNodeType {
            node_type: node_type.to_string(),
            node_id: node_id.to_string(),
        }
        .to_string()
    };
    assert_eq!(problems, vec![unsupported("teleport", "b"), unsupported("pdf", "c")]);
    assert_eq!(problems[0], "Unsupported node type: teleport (node id: b)");
}

#[test]
fn test_empty_flow_is_invalid() {
    let flow = FlowDefinition::new("empty");
    assert_eq!(flow.validate(&supported(&[])), vec!["flow has no nodes".to_string()]);
}

#[test]
fn test_valid_flow_has_no_problems() {
    let flow = FlowDefinition::parse(EDITOR_FLOW).unwrap();
    let problems = flow.validate(&supported(&["restful", "condition", "function", "exit"]));
    assert!(problems.is_empty(), "{:?}", problems);
}
