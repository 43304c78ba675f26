use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value, WorkflowError};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with given configuration
    fn create(&self, config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, category)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub streaming: bool,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            streaming: false,
        }
    }
}

type NodeFn =
    dyn Fn(NodeContext) -> BoxFuture<'static, Result<NodeOutput, NodeError>> + Send + Sync;

/// Node backed by a plain async function, for custom types registered at runtime.
struct FnNode {
    node_type: String,
    func: Arc<NodeFn>,
}

#[async_trait]
impl Node for FnNode {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        (self.func)(ctx).await
    }
}

struct FnNodeFactory {
    node_type: String,
    func: Arc<NodeFn>,
}

impl NodeFactory for FnNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(FnNode {
            node_type: self.node_type.clone(),
            func: self.func.clone(),
        }))
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Custom function node".to_string(),
            category: "custom".to_string(),
            streaming: false,
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory. A later registration for the same type
    /// replaces the earlier one.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Register a custom node type implemented by an async function.
    pub fn register_fn<F, Fut>(&mut self, node_type: impl Into<String>, func: F)
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutput, NodeError>> + Send + 'static,
    {
        let func: Arc<NodeFn> = Arc::new(move |ctx| func(ctx).boxed());
        self.register(Arc::new(FnNodeFactory {
            node_type: node_type.into(),
            func,
        }));
    }

    pub fn lookup(&self, node_type: &str) -> Result<Arc<dyn NodeFactory>, WorkflowError> {
        self.factories
            .get(node_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))
    }

    /// Create a node instance from a node type and config
    pub fn create_node(
        &self,
        node_type: &str,
        config: &serde_json::Map<String, Value>,
    ) -> Result<Box<dyn Node>, WorkflowError> {
        let factory = self.lookup(node_type)?;

        factory
            .create(config)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node: {}", e)))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    pub fn supported_types(&self) -> HashSet<String> {
        self.factories.keys().cloned().collect()
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
