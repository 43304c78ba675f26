use chatflow_core::{ExecutionId, FlowError, FlowId, NodeId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Engine-side record of one node execution. Nodes never see this.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub node_id: NodeId,
    pub node_type: String,
    pub node_name: String,
    pub output_key: String,
    pub status: NodeStatus,
    /// Position in the run's completion order, starting at 1.
    pub index: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub input_data: HashMap<String, Value>,
    pub output_data: Option<HashMap<String, Value>>,
    pub error: Option<String>,
}

/// How one path of the walk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOutcome {
    /// The last node had no admitted outgoing edge.
    Finished,
    /// The node was already visited on this path.
    Skipped { node_id: NodeId },
    Failed {
        node_id: NodeId,
        node_type: String,
        error: String,
    },
    /// The last node fanned out; one sub-result per branch target.
    FannedOut {
        branches: BTreeMap<NodeId, PathResult>,
    },
}

/// Result tree of a walk: the nodes executed in sequence on one path and
/// how the path ended.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub executed: Vec<NodeId>,
    pub outcome: PathOutcome,
}

impl PathResult {
    /// First failure found depth-first, as `(node_id, node_type, error)`.
    pub fn first_failure(&self) -> Option<(&str, &str, &str)> {
        match &self.outcome {
            PathOutcome::Failed {
                node_id,
                node_type,
                error,
            } => Some((node_id, node_type, error)),
            PathOutcome::FannedOut { branches } => {
                branches.values().find_map(PathResult::first_failure)
            }
            _ => None,
        }
    }

    pub fn branch(&self, target: &str) -> Option<&PathResult> {
        match &self.outcome {
            PathOutcome::FannedOut { branches } => branches.get(target),
            _ => None,
        }
    }

    pub fn branches(&self) -> Option<&BTreeMap<NodeId, PathResult>> {
        match &self.outcome {
            PathOutcome::FannedOut { branches } => Some(branches),
            _ => None,
        }
    }
}

/// Terminal aggregate of a run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub success: bool,
    /// Value of the pipeline slot on success; a description of the failure
    /// otherwise.
    pub final_output: Value,
    /// `None` when the run failed before the walk began.
    pub path: Option<PathResult>,
    pub contexts: HashMap<NodeId, ExecutionContext>,
    pub variables: HashMap<String, Value>,
    pub error: Option<FlowError>,
    pub entry_node: Option<NodeId>,
    pub entry_node_type: Option<String>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub(crate) fn failed_early(
        execution_id: ExecutionId,
        flow_id: FlowId,
        entry_node_type: Option<String>,
        error: FlowError,
        elapsed: Duration,
    ) -> Self {
        Self {
            execution_id,
            flow_id,
            success: false,
            final_output: json!({ "error": error.to_string() }),
            path: None,
            contexts: HashMap::new(),
            variables: HashMap::new(),
            error: Some(error),
            entry_node: None,
            entry_node_type,
            elapsed,
        }
    }

    pub fn context(&self, node_id: &str) -> Option<&ExecutionContext> {
        self.contexts.get(node_id)
    }

    /// Ids of nodes with a terminal context, in completion order.
    pub fn executed_nodes(&self) -> Vec<&str> {
        let mut done: Vec<&ExecutionContext> = self
            .contexts
            .values()
            .filter(|c| c.index.is_some())
            .collect();
        done.sort_by_key(|c| c.index);
        done.into_iter().map(|c| c.node_id.as_str()).collect()
    }
}
