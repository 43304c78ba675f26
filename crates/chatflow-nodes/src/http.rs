use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value, ValueExt};
use chatflow_runtime::{NodeFactory, NodeMetadata};
use std::time::Duration;

/// HTTP request node
///
/// `url`, `headers` and `body` are templates rendered against the run
/// variables. The response body lands under the output key, parsed as JSON
/// when possible, with `status` and `headers` alongside.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = ctx.render(ctx.require_config("url")?.as_str().unwrap_or_default());
        let url = url
            .as_str()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| NodeError::Configuration("url must render to text".to_string()))?
            .to_string();
        let method = ctx.config_str("method").unwrap_or("GET").to_uppercase();

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                request = request.header(key, ctx.render_value(value).to_text());
            }
        }

        if let Some(body) = ctx.config.get("body") {
            request = match ctx.render_value(body) {
                Value::String(text) => request.body(text),
                json => request.json(&json),
            };
        }

        if let Some(seconds) = ctx.config.get("timeout").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_secs(seconds));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status.as_u16()));

        if !status.is_success() {
            return Err(NodeError::ExecutionFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body_text
            )));
        }

        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        Ok(NodeOutput::new()
            .with_output(ctx.output_key.clone(), body)
            .with_output("status", status.as_u16())
            .with_output("headers", Value::Object(headers)))
    }

    fn validate_params(&self, config: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut problems = Vec::new();
        match config.get("url") {
            Some(Value::String(url)) if !url.trim().is_empty() => {}
            _ => problems.push("http node requires a url".to_string()),
        }
        if let Some(method) = config.get("method").and_then(Value::as_str) {
            if !["GET", "POST", "PUT", "PATCH", "DELETE"].contains(&method.to_uppercase().as_str()) {
                problems.push(format!("unsupported method: {}", method));
            }
        }
        problems
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpRequestNode::new()))
    }

    fn node_type(&self) -> &str {
        "http"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            streaming: false,
        }
    }
}
