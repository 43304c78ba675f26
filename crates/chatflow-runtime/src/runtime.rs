use crate::config::{EngineConfig, RunOptions};
use crate::executor::FlowExecutor;
use crate::recorder::{ExecutionRecorder, TracingRecorder};
use crate::registry::NodeRegistry;
use crate::result::ExecutionResult;
use crate::streaming::ExecutionStream;
use chatflow_core::{
    EventBus, ExecutionEvent, FlowDefinition, FlowError, FlowId, NodeId, PlaceholderResolver,
    TemplateResolver, Value, WorkflowError,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Main runtime for executing flows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    recorder: Arc<dyn ExecutionRecorder>,
    templates: Arc<dyn TemplateResolver>,
    flows: Arc<RwLock<HashMap<FlowId, FlowDefinition>>>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings and an empty registry
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            config,
            event_bus,
            recorder: Arc::new(TracingRecorder),
            templates: Arc::new(PlaceholderResolver),
            flows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ExecutionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateResolver>) -> Self {
        self.templates = templates;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    fn executor(&self) -> FlowExecutor {
        FlowExecutor::new(
            self.config.clone(),
            self.event_bus.clone(),
            self.recorder.clone(),
            self.templates.clone(),
        )
    }

    /// Register a flow for later execution by id
    pub async fn register_flow(&self, flow: FlowDefinition) -> FlowId {
        let id = flow.id.clone();
        self.flows.write().await.insert(id.clone(), flow);
        id
    }

    /// Execute a registered flow by id
    pub async fn execute_flow(
        &self,
        flow_id: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<ExecutionResult, FlowError> {
        let flow = self
            .flows
            .read()
            .await
            .get(flow_id)
            .cloned()
            .ok_or_else(|| FlowError::Workflow(WorkflowError::FlowNotFound(flow_id.to_string())))?;

        Ok(self.execute(&flow, input, options).await)
    }

    /// Execute a flow directly (without registration)
    pub async fn execute(
        &self,
        flow: &FlowDefinition,
        input: Value,
        options: RunOptions,
    ) -> ExecutionResult {
        self.executor()
            .execute(flow, &self.registry, input, options)
            .await
    }

    /// Execute a flow, relaying the output of its first streaming-capable
    /// node as it is produced.
    pub async fn stream_execute(
        &self,
        flow: &FlowDefinition,
        input: Value,
        options: RunOptions,
    ) -> Result<ExecutionStream, FlowError> {
        self.executor()
            .stream_execute(flow, &self.registry, input, options)
            .await
    }

    /// Problems that would stop the flow from running; empty when it can run.
    pub fn validate(&self, flow: &FlowDefinition) -> Vec<String> {
        match crate::plan::ExecutionPlan::build(flow, &self.registry) {
            Ok(_) => Vec::new(),
            Err(problems) => problems,
        }
    }

    pub fn summary(&self, flow: &FlowDefinition) -> FlowSummary {
        let mut node_types: HashMap<String, usize> = HashMap::new();
        for node in &flow.nodes {
            *node_types.entry(node.node_type.clone()).or_default() += 1;
        }

        FlowSummary {
            flow_id: flow.id.clone(),
            name: flow.name.clone(),
            node_count: flow.nodes.len(),
            edge_count: flow.edges.len(),
            entry_nodes: flow.entry_nodes(),
            node_types,
            problems: self.validate(flow),
        }
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of a flow, as reported before running it.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub flow_id: FlowId,
    pub name: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub entry_nodes: Vec<NodeId>,
    pub node_types: HashMap<String, usize>,
    pub problems: Vec<String>,
}

impl FlowSummary {
    pub fn is_runnable(&self) -> bool {
        self.problems.is_empty()
    }
}
