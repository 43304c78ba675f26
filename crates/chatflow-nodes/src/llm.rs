//! Chat model access for the conversational nodes.
//!
//! [`ChatModel`] is the seam the `agents` and `intent_classification` nodes
//! talk to. [`OpenAiChatModel`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint.

use async_trait::async_trait;
use chatflow_core::{ChunkStream, NodeError};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single-turn chat request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub message: String,
    pub temperature: Option<f64>,
    pub user_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Answer in one piece.
    async fn complete(&self, request: ChatRequest) -> Result<String, NodeError>;

    /// Answer incrementally. Each chunk is one server-sent-event block
    /// (`data: {...}\n\n`) as produced by the provider.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, NodeError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

pub struct OpenAiChatModel {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.message }));

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(user) = &request.user_id {
            body["user"] = json!(user);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, NodeError> {
        let mut req = self.http.post(self.endpoint()).json(body);
        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("model request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(NodeError::ExecutionFailed(format!("HTTP {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, NodeError> {
        let response = self.send(&self.body(&request, false)).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("invalid model response: {}", e)))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NodeError::ExecutionFailed("model response has no content".to_string()))
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, NodeError> {
        let response = self.send(&self.body(&request, true)).await?;

        let mut splitter = SseSplitter::new();
        let chunks = response
            .bytes_stream()
            .map(move |item| match item {
                Ok(bytes) => splitter.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(NodeError::ExecutionFailed(format!(
                    "model stream interrupted: {}",
                    e
                )))],
            })
            .flat_map(stream::iter);

        Ok(Box::pin(chunks))
    }
}

/// Cuts a raw byte stream into complete SSE blocks, each terminated by a
/// blank line. Partial blocks stay buffered until their terminator arrives.
#[derive(Default)]
pub struct SseSplitter {
    buffer: Vec<u8>,
}

impl SseSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut blocks = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block);
            if !text.trim().is_empty() {
                blocks.push(text.into_owned());
            }
        }

        blocks
    }
}
