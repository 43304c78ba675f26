//! Core abstractions for the chatflow engine
//!
//! This crate provides the flow graph model, the variable store, the node
//! executor contract and the error and event types that every other crate
//! depends on. It does not execute anything.

mod error;
pub mod events;
mod kind;
mod node;
pub mod template;
mod value;
mod variables;
mod workflow;

pub use error::{FlowError, NodeError, WorkflowError};
pub use events::*;
pub use kind::{NodeKind, BRANCH_TYPES, ENTRY_TYPES, EXIT_TYPES};
pub use node::{Chunk, ChunkStream, Node, NodeContext, NodeOutput, CONDITION_RESULT, INTENT_RESULT};
pub use template::{PlaceholderResolver, TemplateResolver};
pub use value::{Value, ValueExt};
pub use variables::VariableStore;
pub use workflow::{
    Edge, EdgeCondition, FlowDefinition, FlowId, NodeData, NodeId, NodeSpec, DEFAULT_SLOT,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
