use crate::events::EventEmitter;
use crate::template::{PlaceholderResolver, TemplateResolver};
use crate::{NodeError, NodeId, Value, ValueExt, DEFAULT_SLOT};
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One piece of incremental output.
pub type Chunk = String;

/// Lazily produced, single-pass chunk sequence returned by streaming nodes.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, NodeError>> + Send>>;

/// Output key a branch node uses to report its decision.
pub const CONDITION_RESULT: &str = "condition_result";

/// Output key an intent router uses to name the handle to follow.
pub const INTENT_RESULT: &str = "intent_result";

/// Contract every node type implements.
#[async_trait]
pub trait Node: Send + Sync {
    /// Type identifier as it appears in flow documents (e.g. "agents", "http")
    fn node_type(&self) -> &str;

    /// Run the node to completion.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Whether [`Node::stream_execute`] is implemented. The engine uses this
    /// to locate a streaming target without invoking anything.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Optional: produce output incrementally.
    async fn stream_execute(&self, _ctx: NodeContext) -> Result<ChunkStream, NodeError> {
        Err(NodeError::StreamingUnsupported(self.node_type().to_string()))
    }

    /// Optional: static configuration checks run before a flow starts.
    fn validate_params(&self, _config: &serde_json::Map<String, Value>) -> Vec<String> {
        Vec::new()
    }
}

/// Everything a node sees of the run it is part of.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    pub node_type: String,

    /// Static configuration for this node
    pub config: serde_json::Map<String, Value>,

    /// Input data, keyed by the node's input variable name
    pub inputs: HashMap<String, Value>,

    /// Variable the node reads its primary input from
    pub input_key: String,

    /// Variable the engine will read out of the node's output
    pub output_key: String,

    /// Read-only copy of the run variables at the time the node started
    pub variables: HashMap<String, Value>,

    pub templates: Arc<dyn TemplateResolver>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the caller stops listening to a streamed run
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, node_type: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            config: serde_json::Map::new(),
            inputs: HashMap::new(),
            input_key: DEFAULT_SLOT.to_string(),
            output_key: DEFAULT_SLOT.to_string(),
            variables: HashMap::new(),
            templates: Arc::new(PlaceholderResolver),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// The value stored under the node's input key, `Null` when absent.
    pub fn primary_input(&self) -> Value {
        self.inputs.get(&self.input_key).cloned().unwrap_or(Value::Null)
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    pub fn config_str(&self, name: &str) -> Option<&str> {
        self.config.get(name).and_then(|v| v.as_str())
    }

    /// Render a template against the run variables. The node's inputs are
    /// visible too, shadowing variables of the same name.
    pub fn render(&self, template: &str) -> Value {
        self.templates.resolve(template, &self.template_scope())
    }

    pub fn render_value(&self, value: &Value) -> Value {
        self.templates.resolve_value(value, &self.template_scope())
    }

    fn template_scope(&self) -> HashMap<String, Value> {
        let mut scope = self.variables.clone();
        scope.extend(self.inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        scope
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub outputs: HashMap<String, Value>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn from_map(outputs: HashMap<String, Value>) -> Self {
        Self { outputs }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }

    /// Decision reported by a branch node, if any.
    pub fn condition_result(&self) -> Option<bool> {
        self.outputs
            .get(CONDITION_RESULT)
            .filter(|v| !v.is_null())
            .map(ValueExt::is_truthy)
    }

    /// Handle chosen by an intent router, if any.
    pub fn intent_result(&self) -> Option<&str> {
        self.outputs
            .get(INTENT_RESULT)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
