use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value};
use chatflow_runtime::{NodeFactory, NodeMetadata};

/// Builds a value from the `template` config against the run variables.
/// Without a template the input passes through unchanged.
pub struct FunctionNode;

#[async_trait]
impl Node for FunctionNode {
    fn node_type(&self) -> &str {
        "function"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = match ctx.config.get("template") {
            Some(template) => ctx.render_value(template),
            None => ctx.primary_input(),
        };

        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), value))
    }
}

pub struct FunctionNodeFactory;

impl NodeFactory for FunctionNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(FunctionNode))
    }

    fn node_type(&self) -> &str {
        "function"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Render a template into the output variable".to_string(),
            category: "transform".to_string(),
            streaming: false,
        }
    }
}
