use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value};
use chatflow_runtime::{NodeFactory, NodeMetadata};

/// Parse a JSON string into a structured value
pub struct JsonParseNode;

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.require_input(&ctx.input_key)?;
        let text = input.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: ctx.input_key.clone(),
            expected: "string".to_string(),
            actual: type_name(input).to_string(),
        })?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), parsed))
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonParseNode))
    }

    fn node_type(&self) -> &str {
        "json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            streaming: false,
        }
    }
}

/// Serialize the input value to JSON text
pub struct JsonStringifyNode;

#[async_trait]
impl Node for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = ctx.require_input(&ctx.input_key)?;
        let pretty = ctx.config.get("pretty").and_then(Value::as_bool).unwrap_or(false);

        let json_str = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), json_str))
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(JsonStringifyNode))
    }

    fn node_type(&self) -> &str {
        "json_stringify"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            streaming: false,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
