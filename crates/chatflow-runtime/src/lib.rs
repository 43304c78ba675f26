//! Flow execution runtime
//!
//! This crate provides the engine that runs flows: the node registry, the
//! path walker with branch and fan-out handling, streaming runs and the
//! execution recorder hook.

mod config;
mod executor;
mod plan;
mod recorder;
mod registry;
mod result;
mod runtime;
mod streaming;

pub use config::{EngineConfig, RunOptions};
pub use executor::FlowExecutor;
pub use recorder::{
    ExecutionRecorder, InMemoryRecorder, NodeRecord, RecorderError, RunRecord, TracingRecorder,
};
pub use registry::{NodeFactory, NodeMetadata, NodeRegistry};
pub use result::{ExecutionContext, ExecutionResult, NodeStatus, PathOutcome, PathResult};
pub use runtime::{FlowRuntime, FlowSummary};
pub use streaming::{ExecutionStream, Transcript};
