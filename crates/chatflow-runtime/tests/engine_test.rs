// crates/chatflow-runtime/tests/engine_test.rs

use chatflow_core::{
    ExecutionEvent, FlowDefinition, FlowError, NodeContext, NodeError, NodeOutput, NodeSpec,
    Value, ValueExt, WorkflowError, CONDITION_RESULT, INTENT_RESULT,
};
use chatflow_runtime::{
    EngineConfig, FlowRuntime, NodeRegistry, NodeStatus, PathOutcome, RunOptions,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("chatflow_runtime=debug")
        .with_test_writer()
        .try_init();
}

fn emit(ctx: &NodeContext, value: impl Into<Value>) -> NodeOutput {
    NodeOutput::new().with_output(ctx.output_key.clone(), value)
}

/// Test node types. `calls` counts every node invocation.
fn registry(calls: Arc<AtomicUsize>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    let counter = calls.clone();
    registry.register_fn("start", move |ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(emit(&ctx, ctx.primary_input())) }
    });

    let counter = calls.clone();
    registry.register_fn("append", move |ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let suffix = ctx.config_str("suffix").unwrap_or_default().to_string();
            Ok(emit(&ctx, format!("{}{}", ctx.primary_input().to_text(), suffix)))
        }
    });

    let counter = calls.clone();
    registry.register_fn("set", move |ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let delay = ctx.get_config_or("delay_ms", json!(0)).as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(emit(&ctx, ctx.get_config_or("value", Value::Null)))
        }
    });

    let counter = calls.clone();
    registry.register_fn("condition", move |ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let expected = ctx.config_str("equals").unwrap_or_default().to_string();
            let matched = ctx.primary_input().to_text() == expected;
            Ok(NodeOutput::new()
                .with_output(CONDITION_RESULT, matched)
                .with_output(ctx.output_key.clone(), "router output"))
        }
    });

    let counter = calls.clone();
    registry.register_fn("intent", move |ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            let intent = ctx.config_str("intent").unwrap_or_default().to_string();
            Ok(NodeOutput::new().with_output(INTENT_RESULT, intent))
        }
    });

    let counter = calls.clone();
    registry.register_fn("fail", move |_ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Err(NodeError::ExecutionFailed("boom".to_string())) }
    });

    let counter = calls;
    registry.register_fn("slow", move |ctx: NodeContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(emit(&ctx, ctx.primary_input()))
        }
    });

    registry
}

fn runtime_with(config: EngineConfig) -> (FlowRuntime, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = FlowRuntime::with_registry(Arc::new(registry(calls.clone())), config);
    (runtime, calls)
}

fn runtime() -> (FlowRuntime, Arc<AtomicUsize>) {
    runtime_with(EngineConfig {
        node_reservation_ms: 0,
        ..EngineConfig::default()
    })
}

fn append(id: &str, suffix: &str) -> NodeSpec {
    NodeSpec::new(id, "append").with_config("suffix", suffix)
}

fn set(id: &str, key: &str, value: &str, delay_ms: u64) -> NodeSpec {
    NodeSpec::new(id, "set")
        .with_config("outputParams", key)
        .with_config("value", value)
        .with_config("delay_ms", delay_ms)
}

#[tokio::test]
async fn test_linear_flow_runs_in_order() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("linear");
    flow.add_node(append("a", "a"));
    flow.add_node(append("b", "b"));
    flow.add_node(append("c", "c"));
    flow.connect("a", "b");
    flow.connect("b", "c");

    let result = runtime
        .execute(&flow, json!({ "last_message": "x" }), RunOptions::new())
        .await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.final_output, json!("xabc"));
    assert_eq!(result.executed_nodes(), vec!["a", "b", "c"]);
    assert_eq!(result.context("a").unwrap().index, Some(1));
    assert_eq!(result.context("b").unwrap().index, Some(2));
    assert_eq!(result.context("c").unwrap().index, Some(3));
    assert_eq!(result.entry_node.as_deref(), Some("a"));

    let path = result.path.unwrap();
    assert_eq!(path.executed, vec!["a", "b", "c"]);
    assert_eq!(path.outcome, PathOutcome::Finished);
}

#[tokio::test]
async fn test_store_bookkeeping() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("bookkeeping");
    flow.id = "flow-7".to_string();
    flow.add_node(append("a", "1").with_label("First"));
    flow.add_node(append("b", "2"));
    flow.connect("a", "b");

    let input = json!({ "last_message": "go", "user": "u1" });
    let result = runtime.execute(&flow, input.clone(), RunOptions::new()).await;
    let vars = &result.variables;

    assert_eq!(vars["flow_id"], json!("flow-7"));
    assert_eq!(vars["flow_input"], input);
    assert_eq!(vars["start_node"], json!("a"));
    assert_eq!(vars["node_a_type"], json!("append"));
    assert_eq!(vars["node_a_name"], json!("First"));
    assert_eq!(vars["node_b_name"], json!("b"));
    assert_eq!(vars["node_b_output_key"], json!("last_message"));
    assert_eq!(vars["node_a_index"], json!(1));
    assert_eq!(vars["node_b_index"], json!(2));
    assert_eq!(vars["node_b_result"], json!({ "last_message": "go12" }));
}

#[tokio::test]
async fn test_missing_slot_starts_empty() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("empty");
    flow.add_node(append("a", "!"));

    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;

    assert!(result.success);
    assert_eq!(result.final_output, json!("!"));
    assert_eq!(result.context("a").unwrap().input_data["last_message"], json!(""));
}

#[tokio::test]
async fn test_bare_string_input_fills_pipeline_slot() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("bare");
    flow.add_node(append("a", "!"));

    let result = runtime.execute(&flow, json!("hello"), RunOptions::new()).await;

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.final_output, json!("hello!"));
    assert_eq!(result.context("a").unwrap().input_data["last_message"], json!("hello"));
    assert_eq!(result.variables["flow_input"], json!("hello"));
}

#[tokio::test]
async fn test_cycle_is_rejected_before_execution() {
    let (runtime, calls) = runtime();
    let mut flow = FlowDefinition::new("cyclic");
    flow.add_node(append("entry", ""));
    flow.add_node(append("a", ""));
    flow.add_node(append("b", ""));
    flow.connect("entry", "a");
    flow.connect("a", "b");
    flow.connect("b", "a");

    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;

    assert!(!result.success);
    match &result.error {
        Some(FlowError::ValidationFailed(problems)) => {
            assert!(
                problems.contains(&WorkflowError::CyclicDependency.to_string()),
                "{:?}",
                problems
            )
        }
        other => panic!("expected ValidationFailed, got {:?}", other),
    }
    assert!(result.contexts.is_empty());
    assert!(result.path.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_flow_without_entry_node() {
    let (runtime, calls) = runtime();
    let mut flow = FlowDefinition::new("no-entry");
    flow.add_node(append("a", ""));
    flow.add_node(append("b", ""));
    flow.connect("a", "b");
    flow.connect("b", "a");

    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;

    match &result.error {
        Some(FlowError::ValidationFailed(problems)) => {
            assert!(problems.contains(&"flow has no entry node".to_string()))
        }
        other => panic!("expected ValidationFailed, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_node_type_fails_validation() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("unknown");
    flow.add_node(NodeSpec::new("a", "teleport"));

    let problems = runtime.validate(&flow);
    let expected = FlowError::UnsupportedNodeType {
        node_type: "teleport".to_string(),
        node_id: "a".to_string(),
    };
    assert_eq!(problems, vec![expected.to_string()]);
    assert_eq!(problems[0], "Unsupported node type: teleport (node id: a)");

    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;
    assert!(matches!(result.error, Some(FlowError::ValidationFailed(_))));
    assert!(result.final_output["error"].as_str().unwrap().contains("teleport"));
}

#[tokio::test]
async fn test_explicit_start_node() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("start-at");
    flow.add_node(append("a", "a"));
    flow.add_node(append("b", "b"));
    flow.add_node(append("c", "c"));
    flow.connect("a", "b");
    flow.connect("b", "c");

    let result = runtime
        .execute(&flow, json!({ "last_message": "x" }), RunOptions::new().start_at("b"))
        .await;

    assert!(result.success);
    assert_eq!(result.final_output, json!("xbc"));
    assert!(result.context("a").is_none());
    assert_eq!(result.variables["start_node"], json!("b"));

    let missing = runtime
        .execute(&flow, json!({}), RunOptions::new().start_at("ghost"))
        .await;
    assert_eq!(missing.error, Some(FlowError::StartNodeNotFound("ghost".to_string())));
}

#[tokio::test]
async fn test_fan_out_collects_branches_by_target() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("fan-out");
    flow.add_node(append("start", ""));
    flow.add_node(set("left", "left_value", "L", 20));
    flow.add_node(set("right", "right_value", "R", 0));
    flow.connect("start", "left");
    flow.connect("start", "right");

    let result = runtime.execute(&flow, json!({ "last_message": "go" }), RunOptions::new()).await;

    assert!(result.success, "run failed: {:?}", result.error);
    let path = result.path.as_ref().unwrap();
    let branches = path.branches().expect("start should fan out");
    assert_eq!(branches.len(), 2);
    assert_eq!(path.branch("left").unwrap().executed, vec!["left"]);
    assert_eq!(path.branch("right").unwrap().executed, vec!["right"]);

    assert_eq!(result.variables["left_value"], json!("L"));
    assert_eq!(result.variables["right_value"], json!("R"));
    assert_eq!(result.final_output, json!("go"));
}

#[tokio::test]
async fn test_parallel_writes_merge_in_edge_order() {
    init_tracing();
    for (first_delay, second_delay) in [(40, 0), (0, 40)] {
        let (runtime, _) = runtime();
        let mut flow = FlowDefinition::new("conflict");
        flow.add_node(append("start", ""));
        flow.add_node(set("first", "shared", "one", first_delay));
        flow.add_node(set("second", "shared", "two", second_delay));
        flow.connect("start", "first");
        flow.connect("start", "second");

        let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;

        assert!(result.success);
        assert_eq!(result.variables["shared"], json!("two"));
    }
}

#[tokio::test]
async fn test_merged_values_visible_downstream() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("fan-in");
    flow.add_node(append("start", ""));
    flow.add_node(set("left", "left_value", "L", 0));
    flow.add_node(set("right", "last_message", "R", 10));
    flow.add_node(append("tail", "!"));
    flow.connect("start", "left");
    flow.connect("start", "right");
    flow.connect("right", "tail");

    let result = runtime.execute(&flow, json!({ "last_message": "go" }), RunOptions::new()).await;

    assert!(result.success);
    assert_eq!(result.final_output, json!("R!"));
    assert_eq!(result.variables["left_value"], json!("L"));
}

#[tokio::test]
async fn test_branch_follows_matching_edge_only() {
    let (runtime, calls) = runtime();
    let mut flow = FlowDefinition::new("branch");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("check", "condition").with_config("equals", "hi"));
    flow.add_node(append("yes", " yes"));
    flow.add_node(append("no", " no"));
    flow.connect("start", "check");
    flow.connect_branch("check", "yes", true);
    flow.connect_branch("check", "no", false);

    let result = runtime.execute(&flow, json!({ "last_message": "hi" }), RunOptions::new()).await;

    assert!(result.success);
    assert_eq!(result.final_output, json!("hi yes"));
    assert!(result.context("yes").is_some());
    assert!(result.context("no").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let result = runtime.execute(&flow, json!({ "last_message": "bye" }), RunOptions::new()).await;
    assert_eq!(result.final_output, json!("bye no"));
    assert!(result.context("yes").is_none());
}

#[tokio::test]
async fn test_router_leaves_pipeline_slot_untouched() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("router");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("check", "condition").with_config("equals", "hi"));
    flow.connect("start", "check");

    let result = runtime.execute(&flow, json!({ "last_message": "hi" }), RunOptions::new()).await;

    assert_eq!(result.final_output, json!("hi"));
    let output = result.context("check").unwrap().output_data.clone().unwrap();
    assert_eq!(output["last_message"], json!("router output"));
}

#[tokio::test]
async fn test_intent_selects_matching_handle() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("intent");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("route", "intent").with_config("intent", "billing"));
    flow.add_node(append("billing", " billing"));
    flow.add_node(append("support", " support"));
    flow.add_node(append("fallback", " fallback"));
    flow.connect("start", "route");
    flow.connect_handle("route", "billing", "billing");
    flow.connect_handle("route", "support", "support");
    flow.connect("route", "fallback");

    let result = runtime.execute(&flow, json!({ "last_message": "q" }), RunOptions::new()).await;

    assert!(result.success);
    assert_eq!(result.final_output, json!("q billing"));
    assert!(result.context("support").is_none());
    assert!(result.context("fallback").is_none());
}

#[tokio::test]
async fn test_failure_stops_downstream() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("failure");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("broken", "fail"));
    flow.add_node(append("after", "!"));
    flow.connect("start", "broken");
    flow.connect("broken", "after");

    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;

    assert!(!result.success);
    assert!(result.context("after").is_none());

    let broken = result.context("broken").unwrap();
    assert_eq!(broken.status, NodeStatus::Failed);
    assert_eq!(broken.index, Some(2));
    assert!(broken.error.as_ref().unwrap().contains("boom"));

    assert_eq!(result.final_output["failed_node_id"], json!("broken"));
    assert_eq!(result.final_output["failed_node_type"], json!("fail"));
    match result.error {
        Some(FlowError::NodeExecutionFailed { node_id, node_type, .. }) => {
            assert_eq!(node_id, "broken");
            assert_eq!(node_type, "fail");
        }
        other => panic!("expected NodeExecutionFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failing_branch_does_not_stop_sibling() {
    init_tracing();
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("branch-failure");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("broken", "fail"));
    flow.add_node(set("healthy", "healthy", "ok", 10));
    flow.connect("start", "broken");
    flow.connect("start", "healthy");

    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;

    assert!(!result.success);
    assert_eq!(result.context("healthy").unwrap().status, NodeStatus::Completed);
    assert_eq!(result.variables["healthy"], json!("ok"));

    let path = result.path.unwrap();
    assert!(matches!(
        path.branch("broken").unwrap().outcome,
        PathOutcome::Failed { .. }
    ));
}

#[tokio::test]
async fn test_exhausted_budget_stops_before_next_node() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("timeout");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("slow", "slow"));
    flow.add_node(append("after", "!"));
    flow.connect("start", "slow");
    flow.connect("slow", "after");

    let result = runtime
        .execute(
            &flow,
            json!({}),
            RunOptions::new().with_timeout(Duration::from_millis(100)),
        )
        .await;

    assert!(!result.success);
    assert_eq!(
        result.error,
        Some(FlowError::Timeout {
            node_id: "after".to_string()
        })
    );
    assert_eq!(result.context("slow").unwrap().status, NodeStatus::Completed);
    assert!(result.context("after").is_none());
    assert_eq!(result.final_output["failed_node_id"], json!("after"));
}

#[tokio::test]
async fn test_node_reservation_shrinks_budget() {
    let (runtime, _) = runtime_with(EngineConfig {
        node_reservation_ms: 1000,
        ..EngineConfig::default()
    });
    let mut flow = FlowDefinition::new("reservation");
    flow.add_node(append("a", ""));
    flow.add_node(append("b", ""));
    flow.connect("a", "b");

    let result = runtime
        .execute(&flow, json!({}), RunOptions::new().with_timeout(Duration::from_millis(500)))
        .await;

    assert_eq!(result.error, Some(FlowError::Timeout { node_id: "b".to_string() }));
    assert!(result.context("a").is_some());
    assert!(result.context("b").is_none());
}

#[tokio::test]
async fn test_fan_out_divides_budget_between_branches() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("split-budget");
    flow.add_node(append("a", ""));
    flow.add_node(set("b", "b_value", "B", 400));
    flow.add_node(append("b2", "!"));
    flow.add_node(set("c", "c_value", "C", 0));
    flow.connect("a", "b");
    flow.connect("a", "c");
    flow.connect("b", "b2");

    // 600ms would cover b and b2 on one path, but each branch only gets half.
    let result = runtime
        .execute(&flow, json!({}), RunOptions::new().with_timeout(Duration::from_millis(600)))
        .await;

    assert_eq!(result.error, Some(FlowError::Timeout { node_id: "b2".to_string() }));
    assert_eq!(result.context("b").unwrap().status, NodeStatus::Completed);
    assert!(result.context("b2").is_none());
}

#[tokio::test]
async fn test_branch_timeout_aborts_run_and_keeps_sibling_contexts() {
    init_tracing();
    let (runtime, calls) = runtime();
    let mut flow = FlowDefinition::new("branch-timeout");
    flow.add_node(append("start", ""));
    flow.add_node(NodeSpec::new("slow", "slow"));
    flow.add_node(append("after", "!"));
    flow.add_node(set("quick", "quick_value", "Q", 0));
    flow.add_node(append("quick_tail", "?"));
    flow.connect("start", "slow");
    flow.connect("start", "quick");
    flow.connect("slow", "after");
    flow.connect("quick", "quick_tail");

    let result = runtime
        .execute(&flow, json!({}), RunOptions::new().with_timeout(Duration::from_millis(300)))
        .await;

    assert!(!result.success);
    assert_eq!(result.error, Some(FlowError::Timeout { node_id: "after".to_string() }));
    assert_eq!(result.final_output["failed_node_id"], json!("after"));
    assert!(result.path.is_none());

    assert!(result.context("after").is_none());
    for node_id in ["start", "slow", "quick", "quick_tail"] {
        assert_eq!(result.context(node_id).unwrap().status, NodeStatus::Completed, "{}", node_id);
    }
    assert_eq!(result.variables["quick_value"], json!("Q"));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Run four sleeping branches under `limit` and report the highest number
/// seen in flight at once, plus the wall time.
async fn peak_parallel_branches(limit: usize) -> (usize, Duration) {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut registry = registry(Arc::new(AtomicUsize::new(0)));
    let (running, highest) = (active.clone(), peak.clone());
    registry.register_fn("track", move |ctx: NodeContext| {
        let running = running.clone();
        let highest = highest.clone();
        async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(emit(&ctx, "tracked"))
        }
    });

    let config = EngineConfig {
        max_parallel_nodes: limit,
        node_reservation_ms: 0,
        ..EngineConfig::default()
    };
    let runtime = FlowRuntime::with_registry(Arc::new(registry), config);

    let mut flow = FlowDefinition::new("bounded");
    flow.add_node(append("start", ""));
    for i in 0..4 {
        let id = format!("track_{}", i);
        flow.add_node(NodeSpec::new(id.clone(), "track"));
        flow.connect("start", id);
    }

    let started = Instant::now();
    let result = runtime.execute(&flow, json!({}), RunOptions::new()).await;
    let elapsed = started.elapsed();

    assert!(result.success, "run failed: {:?}", result.error);
    assert_eq!(result.path.unwrap().branches().unwrap().len(), 4);
    (peak.load(Ordering::SeqCst), elapsed)
}

#[tokio::test]
async fn test_max_parallel_nodes_bounds_branch_concurrency() {
    let (peak, elapsed) = peak_parallel_branches(1).await;
    assert_eq!(peak, 1);
    assert!(elapsed >= Duration::from_millis(200), "{:?}", elapsed);

    let (peak, _) = peak_parallel_branches(2).await;
    assert_eq!(peak, 2);

    let (peak, _) = peak_parallel_branches(5).await;
    assert_eq!(peak, 4);
}

#[tokio::test]
async fn test_events_cover_run_lifecycle() {
    let (runtime, _) = runtime();
    let mut events = runtime.subscribe_events();
    let mut flow = FlowDefinition::new("events");
    flow.add_node(append("a", ""));
    flow.add_node(append("b", ""));
    flow.connect("a", "b");

    runtime.execute(&flow, json!({}), RunOptions::new()).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(ExecutionEvent::WorkflowStarted { streaming: false, .. })));
    assert!(matches!(seen.last(), Some(ExecutionEvent::WorkflowCompleted { success: true, .. })));
    let completed = seen
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_registered_flow_by_id() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("registered");
    flow.add_node(append("a", "!"));
    let id = runtime.register_flow(flow).await;

    let result = runtime
        .execute_flow(&id, json!({ "last_message": "hey" }), RunOptions::new())
        .await
        .unwrap();
    assert_eq!(result.final_output, json!("hey!"));

    match runtime.execute_flow("nope", json!({}), RunOptions::new()).await {
        Err(FlowError::Workflow(WorkflowError::FlowNotFound(id))) => assert_eq!(id, "nope"),
        other => panic!("expected FlowNotFound, got {:?}", other.map(|r| r.success)),
    }
}

#[tokio::test]
async fn test_registering_does_not_wait_for_running_flows() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("long-running");
    flow.add_node(NodeSpec::new("a", "slow"));
    let id = runtime.register_flow(flow).await;

    let run = runtime.execute_flow(&id, json!({}), RunOptions::new());
    let register = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut other = FlowDefinition::new("other");
        other.add_node(append("a", ""));
        tokio::time::timeout(Duration::from_millis(100), runtime.register_flow(other)).await
    };

    let (result, registered) = tokio::join!(run, register);
    assert!(result.unwrap().success);
    assert!(registered.is_ok(), "register_flow blocked behind a running flow");
}

#[tokio::test]
async fn test_summary_reports_shape() {
    let (runtime, _) = runtime();
    let mut flow = FlowDefinition::new("summary");
    flow.add_node(append("a", ""));
    flow.add_node(append("b", ""));
    flow.add_node(NodeSpec::new("c", "teleport"));
    flow.connect("a", "b");

    let summary = runtime.summary(&flow);

    assert_eq!(summary.node_count, 3);
    assert_eq!(summary.edge_count, 1);
    assert_eq!(summary.entry_nodes, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(summary.node_types["append"], 2);
    assert!(!summary.is_runnable());
}
