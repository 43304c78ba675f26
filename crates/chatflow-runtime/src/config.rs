use chatflow_core::{NodeId, DEFAULT_SLOT};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings shared by every run of a runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrently running branches at one fan-out point.
    pub max_parallel_nodes: usize,

    /// Reserved. Node retries are not performed.
    pub max_retry_count: u32,

    /// Total budget of a run, in seconds.
    pub execution_timeout: u64,

    /// Time set aside for every hop along a path.
    pub node_reservation_ms: u64,

    /// Name of the pipeline variable nodes read from and write to by default.
    pub default_slot: String,

    pub event_buffer_size: usize,

    /// Capacity of the chunk channel between a streaming run and its caller.
    pub stream_buffer: usize,
}

impl EngineConfig {
    pub fn execution_budget(&self) -> Duration {
        Duration::from_secs(self.execution_timeout)
    }

    pub fn node_reservation(&self) -> Duration {
        Duration::from_millis(self.node_reservation_ms)
    }

    /// Read a config file. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 5,
            max_retry_count: 3,
            execution_timeout: 300,
            node_reservation_ms: 1000,
            default_slot: DEFAULT_SLOT.to_string(),
            event_buffer_size: 1000,
            stream_buffer: 64,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Start here instead of at the first entry node.
    pub start_node: Option<NodeId>,

    /// Overrides `EngineConfig::execution_timeout` for this run.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_at(mut self, node_id: impl Into<NodeId>) -> Self {
        self.start_node = Some(node_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
