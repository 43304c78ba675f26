use crate::{FlowError, Value, WorkflowError};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type FlowId = String;
pub type NodeId = String;

/// Name of the variable slot nodes read from and write to when their
/// configuration does not say otherwise.
pub const DEFAULT_SLOT: &str = "last_message";

fn new_flow_id() -> FlowId {
    Uuid::new_v4().to_string()
}

/// Complete flow definition: the node/edge graph as saved by the flow editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default = "new_flow_id")]
    pub id: FlowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_flow_id(),
            name: Some(name.into()),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Parse a flow document and check its edges against its nodes.
    pub fn parse(json: &str) -> Result<Self, WorkflowError> {
        let flow: FlowDefinition = serde_json::from_str(json)
            .map_err(|e| WorkflowError::MalformedGraph(format!("invalid flow document: {}", e)))?;
        flow.check_references()?;
        Ok(flow)
    }

    /// Same as [`FlowDefinition::parse`] for an already decoded document.
    pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
        let flow: FlowDefinition = serde_json::from_value(value)
            .map_err(|e| WorkflowError::MalformedGraph(format!("invalid flow document: {}", e)))?;
        flow.check_references()?;
        Ok(flow)
    }

    /// Every edge must point at existing nodes and node ids must be unique.
    pub fn check_references(&self) -> Result<(), WorkflowError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(WorkflowError::MalformedGraph(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(WorkflowError::MalformedGraph(format!(
                        "edge {} -> {} references unknown node {}",
                        edge.source, edge.target, endpoint
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Add an unconditional edge.
    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(Edge::new(source, target, None));
    }

    /// Add an edge followed only when the source reports `condition_result == branch`.
    pub fn connect_branch(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        branch: bool,
    ) {
        self.edges
            .push(Edge::new(source, target, Some(branch.to_string())));
    }

    /// Add an edge carrying a route handle (matched against `intent_result`).
    pub fn connect_handle(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        handle: impl Into<String>,
    ) {
        self.edges
            .push(Edge::new(source, target, Some(handle.into())));
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Nodes with no incoming edge, in declaration order.
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        let targets: HashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Whether the dependency graph (target depends on source) admits no
    /// topological order.
    pub fn has_cycle(&self) -> bool {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index = HashMap::new();

        for node in &self.nodes {
            index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
        }

        for edge in &self.edges {
            if let (Some(&from), Some(&to)) =
                (index.get(edge.source.as_str()), index.get(edge.target.as_str()))
            {
                graph.add_edge(from, to, ());
            }
        }

        toposort(&graph, None).is_err()
    }

    /// Structural validation. Returns every problem found; an empty list
    /// means the flow can run.
    pub fn validate(&self, supported_types: &HashSet<String>) -> Vec<String> {
        let mut problems = Vec::new();

        if self.nodes.is_empty() {
            problems.push("flow has no nodes".to_string());
            return problems;
        }

        if self.entry_nodes().is_empty() {
            problems.push("flow has no entry node".to_string());
        }

        if self.has_cycle() {
            problems.push(WorkflowError::CyclicDependency.to_string());
        }

        for node in &self.nodes {
            if !supported_types.contains(&node.node_type) {
                let error = FlowError::UnsupportedNodeType {
                    node_type: node.node_type.clone(),
                    node_id: node.id.clone(),
                };
                problems.push(error.to_string());
            }
        }

        problems
    }
}

/// Node specification in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
}

/// Editor payload of a node. Unknown editor fields are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: NodeData::default(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.config.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = Some(label.into());
        self
    }

    pub fn config(&self) -> &serde_json::Map<String, Value> {
        &self.data.config
    }

    /// Variable the node reads its input from.
    pub fn input_key<'a>(&'a self, default: &'a str) -> &'a str {
        self.config_str(&["inputParams", "input_key"]).unwrap_or(default)
    }

    /// Variable the node's output is written to.
    pub fn output_key<'a>(&'a self, default: &'a str) -> &'a str {
        self.config_str(&["outputParams", "output_key"]).unwrap_or(default)
    }

    pub fn display_name(&self) -> &str {
        self.data
            .label
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.data.name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.id)
    }

    fn config_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.data.config.get(*k))
            .filter_map(|v| v.as_str())
            .find(|s| !s.is_empty())
    }
}

/// Directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(rename = "sourceHandle", default)]
    pub source_handle: Option<String>,
}

impl Edge {
    pub fn new(
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        source_handle: Option<String>,
    ) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle,
        }
    }

    pub fn condition(&self) -> EdgeCondition {
        match self.source_handle.as_deref().map(str::trim) {
            None | Some("") => EdgeCondition::Always,
            Some(h) if h.eq_ignore_ascii_case("true") => EdgeCondition::Branch(true),
            Some(h) if h.eq_ignore_ascii_case("false") => EdgeCondition::Branch(false),
            Some(h) => EdgeCondition::Handle(h.to_string()),
        }
    }
}

/// Routing tag carried by an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeCondition {
    /// No tag: always followed.
    Always,
    /// `"true"`/`"false"`: followed when the source's `condition_result` matches.
    Branch(bool),
    /// Any other tag. Unconditional, unless the source emitted an
    /// `intent_result`, in which case only the matching handle is followed.
    Handle(String),
}
