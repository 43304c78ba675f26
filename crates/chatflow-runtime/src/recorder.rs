//! Persistence hook called once at the end of every run.

use crate::result::{ExecutionResult, NodeStatus};
use async_trait::async_trait;
use chatflow_core::{ExecutionId, FlowId, NodeId, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Summary of one node as it ended up in a run.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub index: Option<u64>,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub input_data: HashMap<String, Value>,
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub input: Value,
    pub result: Value,
    pub success: bool,
    pub error: Option<String>,
    pub entry_node_type: Option<String>,
    pub streaming: bool,
    pub duration_ms: u64,
    pub nodes: HashMap<NodeId, NodeRecord>,
}

impl RunRecord {
    pub fn from_result(input: Value, result: &ExecutionResult, streaming: bool) -> Self {
        // Only nodes that produced something worth keeping are summarised.
        let nodes = result
            .contexts
            .values()
            .filter(|ctx| ctx.output_data.is_some() || ctx.error.is_some())
            .map(|ctx| {
                let output = match (&ctx.output_data, &ctx.error) {
                    (_, Some(error)) if ctx.status == NodeStatus::Failed => {
                        Some(serde_json::json!({ ctx.output_key.clone(): error }))
                    }
                    (Some(out), _) => serde_json::to_value(out).ok(),
                    (None, _) => None,
                };

                let record = NodeRecord {
                    index: ctx.index,
                    name: ctx.node_name.clone(),
                    node_type: ctx.node_type.clone(),
                    input_data: ctx.input_data.clone(),
                    status: ctx.status,
                    output,
                    error: ctx.error.clone(),
                };
                (ctx.node_id.clone(), record)
            })
            .collect();

        Self {
            execution_id: result.execution_id,
            flow_id: result.flow_id.clone(),
            input,
            result: result.final_output.clone(),
            success: result.success,
            error: result.error.as_ref().map(ToString::to_string),
            entry_node_type: result.entry_node_type.clone(),
            streaming,
            duration_ms: result.elapsed.as_millis() as u64,
            nodes,
        }
    }
}

#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
    async fn record(&self, record: RunRecord) -> Result<(), RecorderError>;
}

/// Default recorder: writes a one-line summary to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingRecorder;

#[async_trait]
impl ExecutionRecorder for TracingRecorder {
    async fn record(&self, record: RunRecord) -> Result<(), RecorderError> {
        tracing::info!(
            execution_id = %record.execution_id,
            flow_id = %record.flow_id,
            success = record.success,
            streaming = record.streaming,
            nodes = record.nodes.len(),
            duration_ms = record.duration_ms,
            "run recorded"
        );
        Ok(())
    }
}

/// Keeps every record in memory. Useful for tests and for embedding.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecorder {
    records: Arc<RwLock<Vec<RunRecord>>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<RunRecord> {
        self.records.read().await.clone()
    }

    /// Wait until at least `count` records arrived, or the deadline passes.
    /// Records are written from a detached task, so callers poll.
    pub async fn wait_for(&self, count: usize, deadline: Duration) -> Vec<RunRecord> {
        let started = tokio::time::Instant::now();
        loop {
            let records = self.records().await;
            if records.len() >= count || started.elapsed() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ExecutionRecorder for InMemoryRecorder {
    async fn record(&self, record: RunRecord) -> Result<(), RecorderError> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// Hand a finished run to the recorder on a detached task.
pub(crate) fn dispatch(recorder: Arc<dyn ExecutionRecorder>, record: RunRecord) {
    tokio::spawn(async move {
        let execution_id = record.execution_id;
        if let Err(e) = recorder.record(record).await {
            tracing::warn!("Failed to record execution {}: {}", execution_id, e);
        }
    });
}
