use crate::config::{EngineConfig, RunOptions};
use crate::plan::{ExecutionPlan, PlannedNode};
use crate::recorder::{self, ExecutionRecorder, RunRecord};
use crate::registry::NodeRegistry;
use crate::result::{ExecutionContext, ExecutionResult, NodeStatus, PathOutcome, PathResult};
use chatflow_core::{
    EventBus, ExecutionEvent, ExecutionId, FlowDefinition, FlowError, NodeContext, NodeError,
    NodeId, NodeOutput, TemplateResolver, Value, VariableStore,
};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Time left for the rest of a path.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    remaining: Duration,
    since: Instant,
}

impl Budget {
    pub fn new(total: Duration) -> Self {
        Self {
            remaining: total,
            since: Instant::now(),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining.saturating_sub(self.since.elapsed())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Budget handed to the next node: what is left now, minus the
    /// per-hop reservation.
    pub fn next_hop(&self, reservation: Duration) -> Self {
        Self::new(self.remaining().saturating_sub(reservation))
    }

    /// Share of what is left for each of `branches` parallel paths.
    pub fn split(&self, branches: usize) -> Self {
        let branches = u32::try_from(branches.max(1)).unwrap_or(u32::MAX);
        Self::new(self.remaining() / branches)
    }
}

/// Nodes already executed on the current path.
#[derive(Debug, Clone, Default)]
pub(crate) struct PathState {
    visited: HashSet<usize>,
}

impl PathState {
    pub fn visit(&mut self, idx: usize) -> bool {
        self.visited.insert(idx)
    }
}

#[derive(Default)]
pub(crate) struct Trace {
    contexts: HashMap<NodeId, ExecutionContext>,
    completed: u64,
}

impl Trace {
    fn next_index(&mut self) -> u64 {
        self.completed += 1;
        self.completed
    }
}

/// Shared state of one run.
pub(crate) struct RunState {
    pub execution_id: ExecutionId,
    pub plan: Arc<ExecutionPlan>,
    pub trace: Mutex<Trace>,
    pub cancellation: CancellationToken,
    pub entry: usize,
    pub started: Instant,
}

impl RunState {
    fn new(plan: Arc<ExecutionPlan>, execution_id: ExecutionId, entry: usize) -> Self {
        Self {
            execution_id,
            plan,
            trace: Mutex::new(Trace::default()),
            cancellation: CancellationToken::new(),
            entry,
            started: Instant::now(),
        }
    }
}

/// Walks a flow from its entry node along admitted edges.
#[derive(Clone)]
pub struct FlowExecutor {
    pub(crate) config: EngineConfig,
    pub(crate) events: Arc<EventBus>,
    pub(crate) recorder: Arc<dyn ExecutionRecorder>,
    pub(crate) templates: Arc<dyn TemplateResolver>,
}

impl FlowExecutor {
    pub fn new(
        config: EngineConfig,
        events: Arc<EventBus>,
        recorder: Arc<dyn ExecutionRecorder>,
        templates: Arc<dyn TemplateResolver>,
    ) -> Self {
        Self {
            config,
            events,
            recorder,
            templates,
        }
    }

    /// Run a flow to completion. Every documented failure ends up in the
    /// returned result.
    pub async fn execute(
        &self,
        flow: &FlowDefinition,
        registry: &NodeRegistry,
        input: Value,
        options: RunOptions,
    ) -> ExecutionResult {
        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();

        self.events.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            flow_id: flow.id.clone(),
            streaming: false,
            timestamp: Utc::now(),
        });

        tracing::info!("Starting flow execution: {} ({})", flow.id, execution_id);

        let (run, mut store) = match self.prepare_run(flow, registry, &input, &options, execution_id) {
            Ok(prepared) => prepared,
            Err(error) => {
                let result = self.fail_early(flow, execution_id, error, started);
                self.record(input, &result, false);
                return result;
            }
        };

        let budget = Budget::new(options.timeout.unwrap_or_else(|| self.config.execution_budget()));
        let upstream = self.initial_upstream(&input);
        let path = self
            .run_path(&run, run.entry, upstream, PathState::default(), &mut store, budget)
            .await;

        let result = self.finish(&run, store, path).await;
        self.record(input, &result, false);
        result
    }

    /// Build the plan, resolve the entry node and seed the variable store.
    pub(crate) fn prepare_run(
        &self,
        flow: &FlowDefinition,
        registry: &NodeRegistry,
        input: &Value,
        options: &RunOptions,
        execution_id: ExecutionId,
    ) -> Result<(RunState, VariableStore), FlowError> {
        let plan = ExecutionPlan::build(flow, registry).map_err(|problems| {
            tracing::warn!("Flow {} failed validation: {}", flow.id, problems.join("; "));
            FlowError::ValidationFailed(problems)
        })?;

        let entry = plan.resolve_entry(options.start_node.as_deref())?;
        let store = self.seed_store(&plan, input, entry);

        Ok((RunState::new(Arc::new(plan), execution_id, entry), store))
    }

    fn seed_store(&self, plan: &ExecutionPlan, input: &Value, entry: usize) -> VariableStore {
        let mut store = VariableStore::new();
        store.set("flow_id", plan.flow_id.clone());
        let message = match input {
            Value::Object(map) => map.get(&self.config.default_slot).filter(|v| !v.is_null()),
            Value::Null => None,
            other => Some(other),
        };
        store.set(
            self.config.default_slot.clone(),
            message.cloned().unwrap_or_else(|| Value::String(String::new())),
        );
        store.set("flow_input", input.clone());
        store.set("start_node", plan.node(entry).id());
        store
    }

    /// The run input seen by the entry node as its upstream output.
    pub(crate) fn initial_upstream(&self, input: &Value) -> HashMap<String, Value> {
        match input {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Value::Null => HashMap::new(),
            other => HashMap::from([(self.config.default_slot.clone(), other.clone())]),
        }
    }

    /// Walk one path starting at `start`. Recurses only at fan-out points.
    pub(crate) fn run_path<'a>(
        &'a self,
        run: &'a RunState,
        start: usize,
        input: HashMap<String, Value>,
        mut path: PathState,
        store: &'a mut VariableStore,
        budget: Budget,
    ) -> BoxFuture<'a, Result<PathResult, FlowError>> {
        async move {
            let mut executed = Vec::new();
            let mut current = start;
            let mut upstream = input;
            let mut budget = budget;

            loop {
                let node = run.plan.node(current);

                if !path.visit(current) {
                    tracing::warn!("Node {} already visited on this path, skipping", node.id());
                    self.events.emit(ExecutionEvent::NodeSkipped {
                        execution_id: run.execution_id,
                        node_id: node.id().to_string(),
                        reason: "already visited on this path".to_string(),
                        timestamp: Utc::now(),
                    });
                    return Ok(PathResult {
                        executed,
                        outcome: PathOutcome::Skipped {
                            node_id: node.id().to_string(),
                        },
                    });
                }

                self.check_budget(run, node, &budget)?;

                let output = match self.execute_node(run, current, &upstream, store).await {
                    Ok(output) => output,
                    Err(error) => {
                        return Ok(PathResult {
                            executed,
                            outcome: PathOutcome::Failed {
                                node_id: node.id().to_string(),
                                node_type: node.spec.node_type.clone(),
                                error: error.to_string(),
                            },
                        });
                    }
                };
                executed.push(node.id().to_string());

                let targets = run.plan.admitted(current, &output);
                let next_budget = budget.next_hop(self.config.node_reservation());
                tracing::debug!("Node {} admitted {} successor(s)", node.id(), targets.len());

                match targets.as_slice() {
                    [] => {
                        return Ok(PathResult {
                            executed,
                            outcome: PathOutcome::Finished,
                        })
                    }
                    [next] => {
                        current = *next;
                        upstream = output.outputs;
                        budget = next_budget;
                    }
                    _ => {
                        let branches = self
                            .fan_out(run, &targets, &output.outputs, &path, store, next_budget)
                            .await?;
                        return Ok(PathResult {
                            executed,
                            outcome: PathOutcome::FannedOut { branches },
                        });
                    }
                }
            }
        }
        .boxed()
    }

    /// Run every target as its own branch, at most `max_parallel_nodes` at a
    /// time, then merge the branch stores back in target order.
    pub(crate) async fn fan_out(
        &self,
        run: &RunState,
        targets: &[usize],
        input: &HashMap<String, Value>,
        path: &PathState,
        store: &mut VariableStore,
        budget: Budget,
    ) -> Result<BTreeMap<NodeId, PathResult>, FlowError> {
        tracing::info!("Fanning out to {} branches", targets.len());

        let mut forks: Vec<VariableStore> = targets.iter().map(|_| store.fork()).collect();
        let budget = budget.split(targets.len());

        let branches: Vec<_> = forks
            .iter_mut()
            .zip(targets.iter().copied())
            .enumerate()
            .map(|(position, (fork, target))| {
                self.run_path(run, target, input.clone(), path.clone(), fork, budget)
                    .map(move |result| (position, result))
            })
            .collect();

        let mut results: Vec<(usize, Result<PathResult, FlowError>)> = stream::iter(branches)
            .buffer_unordered(self.config.max_parallel_nodes.max(1))
            .collect()
            .await;
        results.sort_by_key(|(position, _)| *position);

        let mut merged = store.fork();
        for fork in forks {
            for key in merged.merge(fork) {
                tracing::warn!("Parallel branches wrote different values to '{}', keeping the later branch", key);
            }
        }
        store.merge(merged);

        let mut branches = BTreeMap::new();
        for (position, result) in results {
            let target = run.plan.node(targets[position]).id().to_string();
            branches.insert(target, result?);
        }
        Ok(branches)
    }

    pub(crate) fn check_budget(&self, run: &RunState, node: &PlannedNode, budget: &Budget) -> Result<(), FlowError> {
        if run.cancellation.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        if budget.is_exhausted() {
            tracing::error!("Execution budget exhausted before node {} could start", node.id());
            return Err(FlowError::Timeout {
                node_id: node.id().to_string(),
            });
        }
        Ok(())
    }

    /// Build the node's input, run it and fold its output into the store.
    pub(crate) async fn execute_node(
        &self,
        run: &RunState,
        idx: usize,
        upstream: &HashMap<String, Value>,
        store: &mut VariableStore,
    ) -> Result<NodeOutput, NodeError> {
        let node = run.plan.node(idx);
        let ctx = self.prepare_node(run, node, upstream, store).await;
        let started = Instant::now();

        match node.executor.execute(ctx).await {
            Ok(output) => {
                self.complete_node(run, node, &output, store, started).await;
                Ok(output)
            }
            Err(error) => {
                self.fail_node(run, node, &error, started).await;
                Err(error)
            }
        }
    }

    /// Record the start of a node and build the context it runs with.
    pub(crate) async fn prepare_node(
        &self,
        run: &RunState,
        node: &PlannedNode,
        upstream: &HashMap<String, Value>,
        store: &mut VariableStore,
    ) -> NodeContext {
        let node_id = node.id().to_string();
        let input_key = node.spec.input_key(&self.config.default_slot).to_string();
        let output_key = node.spec.output_key(&self.config.default_slot).to_string();

        let value = store
            .get(&input_key)
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| upstream.get(&input_key).cloned())
            .unwrap_or_else(|| Value::String(String::new()));
        let inputs = HashMap::from([(input_key.clone(), value)]);

        store.set(format!("node_{}_type", node_id), node.spec.node_type.clone());
        store.set(format!("node_{}_name", node_id), node.spec.display_name());
        store.set(format!("node_{}_output_key", node_id), output_key.clone());

        run.trace.lock().await.contexts.insert(
            node_id.clone(),
            ExecutionContext {
                node_id: node_id.clone(),
                node_type: node.spec.node_type.clone(),
                node_name: node.spec.display_name().to_string(),
                output_key: output_key.clone(),
                status: NodeStatus::Running,
                index: None,
                start_time: Utc::now(),
                end_time: None,
                input_data: inputs.clone(),
                output_data: None,
                error: None,
            },
        );

        self.events.emit(ExecutionEvent::NodeStarted {
            execution_id: run.execution_id,
            node_id: node_id.clone(),
            node_type: node.spec.node_type.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!("Executing node {} ({})", node_id, node.spec.node_type);

        NodeContext {
            node_id: node_id.clone(),
            node_type: node.spec.node_type.clone(),
            config: node.spec.config().clone(),
            inputs,
            input_key,
            output_key,
            variables: store.get_all(),
            templates: self.templates.clone(),
            events: self.events.create_emitter(run.execution_id, node_id),
            cancellation: run.cancellation.child_token(),
        }
    }

    pub(crate) async fn complete_node(
        &self,
        run: &RunState,
        node: &PlannedNode,
        output: &NodeOutput,
        store: &mut VariableStore,
        started: Instant,
    ) {
        let node_id = node.id().to_string();
        let output_key = node.spec.output_key(&self.config.default_slot);

        if let Some(value) = output.get(output_key).filter(|v| !v.is_null()) {
            if node.kind.is_router() && output_key == self.config.default_slot {
                tracing::debug!("Router node {} leaves {} untouched", node_id, output_key);
            } else {
                store.set(output_key, value.clone());
            }
        }

        let index = {
            let mut trace = run.trace.lock().await;
            let index = trace.next_index();
            if let Some(ctx) = trace.contexts.get_mut(&node_id) {
                ctx.status = NodeStatus::Completed;
                ctx.index = Some(index);
                ctx.end_time = Some(Utc::now());
                ctx.output_data = Some(output.outputs.clone());
            }
            index
        };

        store.set(format!("node_{}_index", node_id), index);
        store.set(format!("node_{}_result", node_id), output.to_json());

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!("Node {} completed in {}ms", node_id, duration_ms);

        self.events.emit(ExecutionEvent::NodeCompleted {
            execution_id: run.execution_id,
            node_id,
            outputs: output.outputs.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub(crate) async fn fail_node(&self, run: &RunState, node: &PlannedNode, error: &NodeError, started: Instant) {
        let node_id = node.id().to_string();
        {
            let mut trace = run.trace.lock().await;
            let index = trace.next_index();
            if let Some(ctx) = trace.contexts.get_mut(&node_id) {
                ctx.status = NodeStatus::Failed;
                ctx.index = Some(index);
                ctx.end_time = Some(Utc::now());
                ctx.error = Some(error.to_string());
            }
        }

        tracing::error!(
            "Node {} failed after {}ms: {}",
            node_id,
            started.elapsed().as_millis(),
            error
        );

        self.events.emit(ExecutionEvent::NodeFailed {
            execution_id: run.execution_id,
            node_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Mark a node completed with its input as output, without invoking it.
    pub(crate) async fn pass_through(
        &self,
        run: &RunState,
        idx: usize,
        upstream: &HashMap<String, Value>,
        store: &mut VariableStore,
    ) -> NodeOutput {
        let node = run.plan.node(idx);
        let ctx = self.prepare_node(run, node, upstream, store).await;
        let output = NodeOutput::from_map(ctx.inputs);
        self.complete_node(run, node, &output, store, Instant::now()).await;
        output
    }

    /// Turn the outcome of the walk into the run's result.
    pub(crate) async fn finish(
        &self,
        run: &RunState,
        store: VariableStore,
        path: Result<PathResult, FlowError>,
    ) -> ExecutionResult {
        let entry = run.plan.node(run.entry);
        let contexts = {
            let mut trace = run.trace.lock().await;
            std::mem::take(&mut trace.contexts)
        };

        let (success, final_output, error, path) = match path {
            Ok(path) => match path.first_failure() {
                None => (
                    true,
                    store.get_or(&self.config.default_slot, Value::Null),
                    None,
                    Some(path),
                ),
                Some((node_id, node_type, message)) => {
                    let error = FlowError::NodeExecutionFailed {
                        node_id: node_id.to_string(),
                        node_type: node_type.to_string(),
                        message: message.to_string(),
                    };
                    let output = json!({
                        "error": message,
                        "failed_node_id": node_id,
                        "failed_node_type": node_type,
                    });
                    (false, output, Some(error), Some(path.clone()))
                }
            },
            Err(error) => {
                let mut output = json!({ "error": error.to_string() });
                if let FlowError::Timeout { node_id } = &error {
                    output["failed_node_id"] = json!(node_id);
                }
                (false, output, Some(error), None)
            }
        };

        let elapsed = run.started.elapsed();
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: run.execution_id,
            success,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });

        match &error {
            None => tracing::info!("Flow {} completed in {:?}", run.plan.flow_id, elapsed),
            Some(e) => tracing::warn!("Flow {} failed: {}", run.plan.flow_id, e),
        }

        ExecutionResult {
            execution_id: run.execution_id,
            flow_id: run.plan.flow_id.clone(),
            success,
            final_output,
            path,
            contexts,
            variables: store.get_all(),
            error,
            entry_node: Some(entry.id().to_string()),
            entry_node_type: Some(entry.spec.node_type.clone()),
            elapsed,
        }
    }

    /// Result for a run that never reached its first node.
    pub(crate) fn fail_early(
        &self,
        flow: &FlowDefinition,
        execution_id: ExecutionId,
        error: FlowError,
        started: Instant,
    ) -> ExecutionResult {
        let entry_node_type = flow
            .entry_nodes()
            .first()
            .and_then(|id| flow.find_node(id))
            .map(|node| node.node_type.clone());
        let elapsed = started.elapsed();

        tracing::warn!("Flow {} failed before start: {}", flow.id, error);
        self.events.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            success: false,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });

        ExecutionResult::failed_early(execution_id, flow.id.clone(), entry_node_type, error, elapsed)
    }

    pub(crate) fn record(&self, input: Value, result: &ExecutionResult, streaming: bool) {
        recorder::dispatch(self.recorder.clone(), RunRecord::from_result(input, result, streaming));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::InMemoryRecorder;
    use chatflow_core::{NodeSpec, PlaceholderResolver};

    fn executor() -> FlowExecutor {
        let config = EngineConfig {
            node_reservation_ms: 0,
            ..EngineConfig::default()
        };
        FlowExecutor::new(
            config,
            Arc::new(EventBus::new(16)),
            Arc::new(InMemoryRecorder::new()),
            Arc::new(PlaceholderResolver),
        )
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register_fn("echo", |ctx: NodeContext| async move {
            Ok(NodeOutput::new().with_output(ctx.output_key.clone(), ctx.primary_input()))
        });
        registry
    }

    #[tokio::test]
    async fn test_revisited_node_is_skipped() {
        let mut flow = FlowDefinition::new("loop");
        flow.add_node(NodeSpec::new("a", "echo"));
        flow.add_node(NodeSpec::new("b", "echo"));
        flow.connect("a", "b");
        flow.connect("b", "a");

        // The graph check would reject this flow; resolve it directly.
        let plan = match ExecutionPlan::resolve(&flow, &registry()) {
            Ok(plan) => plan,
            Err(problems) => panic!("unexpected problems: {:?}", problems),
        };
        let run = RunState::new(Arc::new(plan), ExecutionId::new_v4(), 0);
        let mut store = VariableStore::new();
        store.set("last_message", "hi");

        let exec = executor();
        let path = exec
            .run_path(
                &run,
                0,
                HashMap::new(),
                PathState::default(),
                &mut store,
                Budget::new(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert_eq!(path.executed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            path.outcome,
            PathOutcome::Skipped {
                node_id: "a".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_budget_shrinks_by_reservation() {
        let budget = Budget::new(Duration::from_millis(500));
        let next = budget.next_hop(Duration::from_millis(200));
        assert!(next.remaining() <= Duration::from_millis(300));
        assert!(!next.is_exhausted());

        let spent = next.next_hop(Duration::from_secs(1));
        assert!(spent.is_exhausted());
    }

    #[tokio::test]
    async fn test_budget_split_between_branches() {
        let budget = Budget::new(Duration::from_millis(900));
        let share = budget.split(3);
        assert!(share.remaining() <= Duration::from_millis(300));
        assert!(share.remaining() > Duration::from_millis(200));
        assert!(budget.split(0).remaining() > Duration::from_millis(600));
    }

    #[test]
    fn test_bare_input_seeds_default_slot() {
        let mut flow = FlowDefinition::new("seed");
        flow.add_node(NodeSpec::new("a", "echo"));
        let plan = match ExecutionPlan::build(&flow, &registry()) {
            Ok(plan) => plan,
            Err(problems) => panic!("unexpected problems: {:?}", problems),
        };

        let exec = executor();
        let store = exec.seed_store(&plan, &json!("hello"), 0);
        assert_eq!(store.get("last_message"), Some(&json!("hello")));
        assert_eq!(store.get("flow_input"), Some(&json!("hello")));

        let store = exec.seed_store(&plan, &Value::Null, 0);
        assert_eq!(store.get("last_message"), Some(&json!("")));
    }
}
