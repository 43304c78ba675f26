//! Standard node library
//!
//! Built-in node types for chat flows. [`register_all`] installs the ones
//! that need nothing external; [`register_model_nodes`] adds the nodes that
//! talk to a chat model.

mod agent;
mod branch;
mod entry;
mod function;
mod http;
mod intent;
pub mod llm;
mod time;
mod transform;

pub use agent::{agent_request, AgentNode, AgentNodeFactory};
pub use branch::{evaluate, BranchNode, BranchNodeFactory};
pub use entry::{EntryNode, EntryNodeFactory, ExitNode, ExitNodeFactory};
pub use function::{FunctionNode, FunctionNodeFactory};
pub use http::{HttpRequestNode, HttpRequestNodeFactory};
pub use intent::{IntentClassifierNode, IntentClassifierNodeFactory};
pub use llm::{ChatModel, ChatRequest, OpenAiChatModel, OpenAiConfig};
pub use time::{DelayNode, DelayNodeFactory};
pub use transform::{JsonParseNode, JsonParseNodeFactory, JsonStringifyNode, JsonStringifyNodeFactory};

use chatflow_runtime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    for factory in EntryNodeFactory::all() {
        registry.register(Arc::new(factory));
    }
    for factory in ExitNodeFactory::all() {
        registry.register(Arc::new(factory));
    }
    for factory in BranchNodeFactory::all() {
        registry.register(Arc::new(factory));
    }
    registry.register(Arc::new(FunctionNodeFactory));
    registry.register(Arc::new(HttpRequestNodeFactory));
    registry.register(Arc::new(JsonParseNodeFactory));
    registry.register(Arc::new(JsonStringifyNodeFactory));
    registry.register(Arc::new(DelayNodeFactory));
}

/// Register the chat-model nodes (`agents`, `intent_classification`).
pub fn register_model_nodes(registry: &mut NodeRegistry, model: Arc<dyn ChatModel>) {
    registry.register(Arc::new(AgentNodeFactory::new(model.clone())));
    registry.register(Arc::new(IntentClassifierNodeFactory::new(model)));
}
