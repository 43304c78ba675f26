use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value, ENTRY_TYPES, EXIT_TYPES};
use chatflow_runtime::{NodeFactory, NodeMetadata};

/// Where a conversation enters the flow. Every channel alias behaves the
/// same: the incoming message is handed on unchanged.
pub struct EntryNode {
    node_type: &'static str,
}

#[async_trait]
impl Node for EntryNode {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), ctx.primary_input()))
    }
}

pub struct EntryNodeFactory {
    node_type: &'static str,
}

impl EntryNodeFactory {
    /// One factory per accepted entry alias.
    pub fn all() -> impl Iterator<Item = Self> {
        ENTRY_TYPES.iter().map(|&node_type| Self { node_type })
    }
}

impl NodeFactory for EntryNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(EntryNode {
            node_type: self.node_type,
        }))
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: format!("Entry point for {} conversations", self.node_type),
            category: "entry".to_string(),
            streaming: false,
        }
    }
}

/// Terminal node. Emits its input as the flow's answer.
pub struct ExitNode {
    node_type: &'static str,
}

#[async_trait]
impl Node for ExitNode {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.events.info("flow reached its exit");
        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), ctx.primary_input()))
    }
}

pub struct ExitNodeFactory {
    node_type: &'static str,
}

impl ExitNodeFactory {
    pub fn all() -> impl Iterator<Item = Self> {
        EXIT_TYPES.iter().map(|&node_type| Self { node_type })
    }
}

impl NodeFactory for ExitNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ExitNode {
            node_type: self.node_type,
        }))
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "End of a flow".to_string(),
            category: "entry".to_string(),
            streaming: false,
        }
    }
}
