use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value};
use chatflow_runtime::{NodeFactory, NodeMetadata};
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Wait before passing the input on. Cancelling the run cuts the wait short.
pub struct DelayNode;

#[async_trait]
impl Node for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_DELAY_MS);

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), ctx.primary_input()))
    }

    fn validate_params(&self, config: &serde_json::Map<String, Value>) -> Vec<String> {
        match config.get("delay_ms") {
            Some(v) if v.as_u64().is_none() => {
                vec!["delay_ms must be a non-negative integer".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DelayNode))
    }

    fn node_type(&self) -> &str {
        "delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            streaming: false,
        }
    }
}
