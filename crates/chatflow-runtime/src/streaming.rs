//! Streaming runs: relay the chunks of the first streaming-capable node to
//! the caller while the rest of the flow runs around it.

use crate::config::RunOptions;
use crate::executor::{Budget, FlowExecutor, PathState, RunState};
use crate::registry::NodeRegistry;
use crate::result::{ExecutionResult, PathOutcome, PathResult};
use chatflow_core::{
    Chunk, ChunkStream, ExecutionEvent, ExecutionId, FlowDefinition, FlowError, NodeError,
    NodeOutput, Value, ValueExt, VariableStore,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// AGUI event types that carry no user-visible text.
const CONTROL_EVENTS: &[&str] = &[
    "TOOL_CALL_START",
    "TOOL_CALL_ARGS",
    "TOOL_CALL_END",
    "TOOL_CALL_RESULT",
    "RUN_STARTED",
    "RUN_FINISHED",
    "RUN_ERROR",
    "TEXT_MESSAGE_START",
    "TEXT_MESSAGE_END",
    "CUSTOM",
];

/// Chunks of a streaming run, in production order. The final result of the
/// run is available from [`ExecutionStream::finish`].
pub struct ExecutionStream {
    execution_id: ExecutionId,
    chunks: ReceiverStream<Result<Chunk, FlowError>>,
    result: oneshot::Receiver<ExecutionResult>,
}

impl ExecutionStream {
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Drain any chunks not consumed yet and wait for the run to end.
    pub async fn finish(mut self) -> Result<ExecutionResult, FlowError> {
        while self.chunks.next().await.is_some() {}
        self.result
            .await
            .map_err(|_| FlowError::Internal("run ended without a result".to_string()))
    }
}

impl Stream for ExecutionStream {
    type Item = Result<Chunk, FlowError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().chunks).poll_next(cx)
    }
}

/// Accumulates relayed chunks and extracts the text they carry.
///
/// Chunks in server-sent-event form (`data: {...}` lines) are decoded as
/// OpenAI chat completion chunks or AGUI events. Anything else is kept
/// verbatim.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    raw: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.raw.push_str(chunk);
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn text(&self) -> String {
        let events: Vec<&str> = self
            .raw
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix("data:"))
            .map(str::trim)
            .collect();

        if events.is_empty() {
            return self.raw.clone();
        }

        let mut text = String::new();
        for payload in events {
            if payload.is_empty() || payload == "[DONE]" {
                continue;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(event) => text.push_str(&event_text(&event)),
                Err(_) => text.push_str(payload),
            }
        }
        text
    }
}

fn event_text(event: &Value) -> String {
    if let Some(choices) = event.get("choices").and_then(Value::as_array) {
        return choices
            .iter()
            .filter_map(|choice| {
                choice
                    .pointer("/delta/content")
                    .or_else(|| choice.pointer("/message/content"))
                    .and_then(Value::as_str)
            })
            .collect();
    }

    if let Some(kind) = event.get("type").and_then(Value::as_str) {
        if kind == "TEXT_MESSAGE_CONTENT" {
            return event.get("delta").map(ValueExt::to_text).unwrap_or_default();
        }
        if CONTROL_EVENTS.contains(&kind) {
            return String::new();
        }
    }

    if let Value::String(s) = event {
        return s.clone();
    }

    ["content", "message", "text", "delta"]
        .iter()
        .find_map(|key| event.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

impl FlowExecutor {
    /// Start a streaming run. Fails before the first chunk when the flow is
    /// invalid, no streaming-capable node is reachable from the entry, or a
    /// node in front of it fails. Later failures arrive as the stream's last
    /// item and in the final result.
    pub async fn stream_execute(
        &self,
        flow: &FlowDefinition,
        registry: &NodeRegistry,
        input: Value,
        options: RunOptions,
    ) -> Result<ExecutionStream, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let started = Instant::now();

        self.events.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            flow_id: flow.id.clone(),
            streaming: true,
            timestamp: Utc::now(),
        });
        tracing::info!("Starting streaming execution: {} ({})", flow.id, execution_id);

        let (run, mut store) = match self.prepare_run(flow, registry, &input, &options, execution_id) {
            Ok(prepared) => prepared,
            Err(error) => {
                let result = self.fail_early(flow, execution_id, error.clone(), started);
                self.record(input, &result, true);
                return Err(error);
            }
        };
        let run = Arc::new(run);

        let Some((target, between)) = run.plan.find_stream_target(run.entry) else {
            let entry_id = run.plan.node(run.entry).id().to_string();
            let error = FlowError::StreamingUnsupported(format!(
                "no streaming node reachable from {}",
                entry_id
            ));
            let result = self.finish(&run, store, Err(error.clone())).await;
            self.record(input, &result, true);
            return Err(error);
        };

        let mut budget = Budget::new(options.timeout.unwrap_or_else(|| self.config.execution_budget()));
        let reservation = self.config.node_reservation();
        let mut path = PathState::default();
        let mut executed = Vec::new();
        let mut shared = self.initial_upstream(&input);

        if target != run.entry {
            path.visit(run.entry);
            let output = self.pass_through(&run, run.entry, &shared, &mut store).await;
            shared.extend(output.outputs);
            executed.push(run.plan.node(run.entry).id().to_string());
            budget = budget.next_hop(reservation);
        }

        for idx in between {
            let node = run.plan.node(idx);
            path.visit(idx);

            if let Err(error) = self.check_budget(&run, node, &budget) {
                let result = self.finish(&run, store, Err(error.clone())).await;
                self.record(input, &result, true);
                return Err(error);
            }

            match self.execute_node(&run, idx, &shared, &mut store).await {
                Ok(output) => shared.extend(output.outputs),
                Err(error) => {
                    let failed = self
                        .finish_failed(&run, store, executed, idx, &error)
                        .await;
                    let flow_error = failed.error.clone().unwrap_or_else(|| FlowError::Node(error.clone()));
                    self.record(input, &failed, true);
                    return Err(flow_error);
                }
            }
            executed.push(node.id().to_string());
            budget = budget.next_hop(reservation);
        }

        let node = run.plan.node(target);
        path.visit(target);
        if let Err(error) = self.check_budget(&run, node, &budget) {
            let result = self.finish(&run, store, Err(error.clone())).await;
            self.record(input, &result, true);
            return Err(error);
        }

        let ctx = self.prepare_node(&run, node, &shared, &mut store).await;
        let node_started = Instant::now();
        let chunks = match node.executor.stream_execute(ctx).await {
            Ok(chunks) => chunks,
            Err(error) => {
                self.fail_node(&run, node, &error, node_started).await;
                let failed = self.finish_failed(&run, store, executed, target, &error).await;
                let flow_error = failed.error.clone().unwrap_or_else(|| FlowError::Node(error.clone()));
                self.record(input, &failed, true);
                return Err(flow_error);
            }
        };

        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let (result_tx, result_rx) = oneshot::channel();

        let relay = Relay {
            executor: self.clone(),
            run,
            target,
            path,
            executed,
            budget,
            node_started,
        };
        tokio::spawn(relay.run(chunks, store, input, tx, result_tx));

        Ok(ExecutionStream {
            execution_id,
            chunks: ReceiverStream::new(rx),
            result: result_rx,
        })
    }

    async fn finish_failed(
        &self,
        run: &RunState,
        store: VariableStore,
        executed: Vec<String>,
        idx: usize,
        error: &NodeError,
    ) -> ExecutionResult {
        let node = run.plan.node(idx);
        let path = PathResult {
            executed,
            outcome: PathOutcome::Failed {
                node_id: node.id().to_string(),
                node_type: node.spec.node_type.clone(),
                error: error.to_string(),
            },
        };
        self.finish(run, store, Ok(path)).await
    }
}

/// Producer side of a streaming run, detached from the caller.
struct Relay {
    executor: FlowExecutor,
    run: Arc<RunState>,
    target: usize,
    path: PathState,
    executed: Vec<String>,
    budget: Budget,
    node_started: Instant,
}

impl Relay {
    async fn run(
        self,
        mut chunks: ChunkStream,
        mut store: VariableStore,
        input: Value,
        tx: mpsc::Sender<Result<Chunk, FlowError>>,
        result_tx: oneshot::Sender<ExecutionResult>,
    ) {
        let Relay {
            executor,
            run,
            target,
            path,
            mut executed,
            budget,
            node_started,
        } = self;
        let node = run.plan.node(target);
        let mut transcript = Transcript::new();
        let mut sequence = 0u64;
        let mut failure: Option<NodeError> = None;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    tracing::info!("Caller stopped listening, cancelling node {}", node.id());
                    run.cancellation.cancel();
                    failure = Some(NodeError::Cancelled);
                    break;
                }
                item = chunks.next() => match item {
                    Some(Ok(chunk)) => {
                        transcript.push(&chunk);
                        sequence += 1;
                        executor.events.emit(ExecutionEvent::StreamChunk {
                            execution_id: run.execution_id,
                            node_id: node.id().to_string(),
                            sequence,
                            timestamp: Utc::now(),
                        });
                        if tx.send(Ok(chunk)).await.is_err() {
                            run.cancellation.cancel();
                            failure = Some(NodeError::Cancelled);
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        failure = Some(error);
                        break;
                    }
                    None => break,
                }
            }
        }
        drop(chunks);

        let path_result = match failure {
            Some(error) => {
                executor.fail_node(&run, node, &error, node_started).await;
                if error == NodeError::Cancelled {
                    Err(FlowError::Cancelled)
                } else {
                    Ok(PathResult {
                        executed,
                        outcome: PathOutcome::Failed {
                            node_id: node.id().to_string(),
                            node_type: node.spec.node_type.clone(),
                            error: error.to_string(),
                        },
                    })
                }
            }
            None => {
                let output_key = node.spec.output_key(&executor.config.default_slot);
                let output = NodeOutput::new().with_output(output_key, transcript.text());
                executor
                    .complete_node(&run, node, &output, &mut store, node_started)
                    .await;
                executed.push(node.id().to_string());

                let successors = run.plan.admitted(target, &output);
                let next_budget = budget.next_hop(executor.config.node_reservation());
                let tail = match successors.as_slice() {
                    [] => Ok(PathResult {
                        executed: Vec::new(),
                        outcome: PathOutcome::Finished,
                    }),
                    [next] => {
                        executor
                            .run_path(&run, *next, output.outputs.clone(), path, &mut store, next_budget)
                            .await
                    }
                    _ => executor
                        .fan_out(&run, &successors, &output.outputs, &path, &mut store, next_budget)
                        .await
                        .map(|branches| PathResult {
                            executed: Vec::new(),
                            outcome: PathOutcome::FannedOut { branches },
                        }),
                };

                tail.map(|tail| {
                    executed.extend(tail.executed);
                    PathResult {
                        executed,
                        outcome: tail.outcome,
                    }
                })
            }
        };

        let result = executor.finish(&run, store, path_result).await;
        if let Some(error) = result.error.clone() {
            if error != FlowError::Cancelled {
                let _ = tx.send(Err(error)).await;
            }
        }
        drop(tx);

        executor.record(input, &result, true);
        let _ = result_tx.send(result);
    }
}
