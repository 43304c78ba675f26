//! Execution plan: a flow with every node resolved to its executor and every
//! edge resolved to a target index, built once per run.

use crate::registry::NodeRegistry;
use chatflow_core::{EdgeCondition, FlowDefinition, FlowError, FlowId, Node, NodeKind, NodeOutput, NodeSpec};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub(crate) struct PlannedEdge {
    pub target: usize,
    pub condition: EdgeCondition,
    pub handle: Option<String>,
}

impl PlannedEdge {
    /// Edge admission for the output a node just produced.
    pub fn admits(&self, output: &NodeOutput) -> bool {
        if let Some(intent) = output.intent_result() {
            return self.handle.as_deref().map(str::trim) == Some(intent);
        }

        match &self.condition {
            EdgeCondition::Always | EdgeCondition::Handle(_) => true,
            EdgeCondition::Branch(expected) => match output.condition_result() {
                Some(actual) => actual == *expected,
                None => {
                    tracing::warn!("branch edge without a condition_result on the source node, not followed");
                    false
                }
            },
        }
    }
}

pub(crate) struct PlannedNode {
    pub spec: NodeSpec,
    pub kind: NodeKind,
    pub executor: Arc<dyn Node>,
    pub outgoing: Vec<PlannedEdge>,
}

impl PlannedNode {
    pub fn id(&self) -> &str {
        &self.spec.id
    }
}

pub(crate) struct ExecutionPlan {
    pub flow_id: FlowId,
    pub nodes: Vec<PlannedNode>,
    index: HashMap<String, usize>,
    entry_nodes: Vec<usize>,
}

impl ExecutionPlan {
    /// Validate the flow against the registry and resolve every node.
    /// Returns the full list of problems when the flow cannot run.
    pub fn build(flow: &FlowDefinition, registry: &NodeRegistry) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();

        if let Err(e) = flow.check_references() {
            problems.push(e.to_string());
            return Err(problems);
        }

        problems.extend(flow.validate(&registry.supported_types()));
        if !problems.is_empty() {
            return Err(problems);
        }

        Self::resolve(flow, registry)
    }

    /// Resolve executors and edges without checking the graph shape.
    pub fn resolve(flow: &FlowDefinition, registry: &NodeRegistry) -> Result<Self, Vec<String>> {
        let mut problems = Vec::new();
        let index: HashMap<String, usize> = flow
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut nodes = Vec::with_capacity(flow.nodes.len());
        for spec in &flow.nodes {
            let executor: Arc<dyn Node> = match registry.create_node(&spec.node_type, spec.config()) {
                Ok(node) => Arc::from(node),
                Err(e) => {
                    problems.push(format!("node {}: {}", spec.id, e));
                    continue;
                }
            };

            problems.extend(
                executor
                    .validate_params(spec.config())
                    .into_iter()
                    .map(|p| format!("node {}: {}", spec.id, p)),
            );

            let outgoing = flow
                .outgoing(&spec.id)
                .filter_map(|edge| {
                    index.get(&edge.target).map(|&target| PlannedEdge {
                        target,
                        condition: edge.condition(),
                        handle: edge.source_handle.clone(),
                    })
                })
                .collect();

            nodes.push(PlannedNode {
                kind: NodeKind::parse(&spec.node_type),
                spec: spec.clone(),
                executor,
                outgoing,
            });
        }

        if !problems.is_empty() {
            return Err(problems);
        }

        let entry_nodes = flow
            .entry_nodes()
            .iter()
            .filter_map(|id| index.get(id).copied())
            .collect();

        Ok(Self {
            flow_id: flow.id.clone(),
            nodes,
            index,
            entry_nodes,
        })
    }

    pub fn node(&self, idx: usize) -> &PlannedNode {
        &self.nodes[idx]
    }

    /// Explicit start node if given, else the first entry node.
    pub fn resolve_entry(&self, start_node: Option<&str>) -> Result<usize, FlowError> {
        match start_node {
            Some(id) => self
                .index
                .get(id)
                .copied()
                .ok_or_else(|| FlowError::StartNodeNotFound(id.to_string())),
            None => self.entry_nodes.first().copied().ok_or(FlowError::NoEntryNode),
        }
    }

    /// Targets of the admitted outgoing edges of `idx`, deduplicated, in edge
    /// declaration order.
    pub fn admitted(&self, idx: usize, output: &NodeOutput) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.nodes[idx]
            .outgoing
            .iter()
            .filter(|edge| edge.admits(output))
            .map(|edge| edge.target)
            .filter(|target| seen.insert(*target))
            .collect()
    }

    /// Breadth-first search from `entry` for the first node able to stream.
    /// Returns the target and the nodes strictly between entry and target,
    /// in path order.
    pub fn find_stream_target(&self, entry: usize) -> Option<(usize, Vec<usize>)> {
        if self.nodes[entry].executor.supports_streaming() {
            return Some((entry, Vec::new()));
        }

        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut visited = HashSet::from([entry]);
        let mut queue = VecDeque::from([entry]);

        while let Some(current) = queue.pop_front() {
            for edge in &self.nodes[current].outgoing {
                let next = edge.target;
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, current);

                if self.nodes[next].executor.supports_streaming() {
                    let mut between = Vec::new();
                    let mut cursor = current;
                    while cursor != entry {
                        between.push(cursor);
                        cursor = parent[&cursor];
                    }
                    between.reverse();
                    return Some((next, between));
                }

                queue.push_back(next);
            }
        }

        None
    }
}
