use crate::llm::{ChatModel, ChatRequest};
use async_trait::async_trait;
use chatflow_core::{ChunkStream, Node, NodeContext, NodeError, NodeOutput, Value, ValueExt};
use chatflow_runtime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

/// Build the chat request an agent sends for the current node.
///
/// A configured `prompt` is rendered and placed on its own line before the
/// incoming message. The caller's `user_id` is taken from `flow_input`.
pub fn agent_request(ctx: &NodeContext) -> ChatRequest {
    let message = ctx.primary_input().to_text();
    let prompt = ctx
        .config
        .get("prompt")
        .map(|p| ctx.render_value(p).to_text())
        .unwrap_or_default();

    let message = if prompt.is_empty() {
        message
    } else {
        format!("{}\n{}", prompt, message)
    };

    let user_id = ctx
        .variables
        .get("flow_input")
        .and_then(|input| input.get("user_id"))
        .map(ValueExt::to_text)
        .filter(|id| !id.is_empty())
        .or_else(|| Some("anonymous".to_string()));

    ChatRequest {
        system: ctx.config_str("systemPrompt").map(str::to_string),
        message,
        temperature: ctx.config.get("temperature").and_then(Value::as_f64),
        user_id,
    }
}

/// Conversational agent backed by a chat model. The only built-in node
/// that can stream.
pub struct AgentNode {
    model: Arc<dyn ChatModel>,
}

impl AgentNode {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Node for AgentNode {
    fn node_type(&self) -> &str {
        "agents"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let request = agent_request(&ctx);
        ctx.events.info("calling chat model");

        let answer = tokio::select! {
            answer = self.model.complete(request) => answer?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        Ok(NodeOutput::new().with_output(ctx.output_key.clone(), answer))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream_execute(&self, ctx: NodeContext) -> Result<ChunkStream, NodeError> {
        let request = agent_request(&ctx);
        ctx.events.info("streaming from chat model");
        self.model.stream(request).await
    }
}

pub struct AgentNodeFactory {
    model: Arc<dyn ChatModel>,
}

impl AgentNodeFactory {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

impl NodeFactory for AgentNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(AgentNode::new(self.model.clone())))
    }

    fn node_type(&self) -> &str {
        "agents"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Answer with a chat model".to_string(),
            category: "ai".to_string(),
            streaming: true,
        }
    }
}
