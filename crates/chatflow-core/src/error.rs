use thiserror::Error;

/// Run-level failures. Every variant except `Internal` is captured into an
/// execution result rather than returned past the engine boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Flow validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("No entry node found")]
    NoEntryNode,

    #[error("Start node does not exist: {0}")]
    StartNodeNotFound(String),

    #[error("Node {node_id} ({node_type}) failed: {message}")]
    NodeExecutionFailed {
        node_id: String,
        node_type: String,
        message: String,
    },

    #[error("Execution budget exhausted before node {node_id} could start")]
    Timeout { node_id: String },

    #[error("Streaming unsupported: {0}")]
    StreamingUnsupported(String),

    #[error("Unsupported node type: {node_type} (node id: {node_id})")]
    UnsupportedNodeType { node_type: String, node_id: String },

    #[error("Cancelled by caller")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::Serialization(e.to_string())
    }
}

impl FlowError {
    /// Short machine-readable name of the variant, used in run records.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Node(_) => "NodeError",
            FlowError::Workflow(_) => "WorkflowError",
            FlowError::ValidationFailed(_) => "ValidationFailed",
            FlowError::NoEntryNode => "NoEntryNode",
            FlowError::StartNodeNotFound(_) => "StartNodeNotFound",
            FlowError::NodeExecutionFailed { .. } => "NodeExecutionFailed",
            FlowError::Timeout { .. } => "Timeout",
            FlowError::StreamingUnsupported(_) => "StreamingUnsupported",
            FlowError::UnsupportedNodeType { .. } => "UnsupportedNodeType",
            FlowError::Cancelled => "Cancelled",
            FlowError::Serialization(_) => "Serialization",
            FlowError::Internal(_) => "Internal",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Node type '{0}' does not support streaming execution")]
    StreamingUnsupported(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected: flow contains a cycle")]
    CyclicDependency,

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),
}
