use crate::agent::agent_request;
use crate::llm::ChatModel;
use async_trait::async_trait;
use chatflow_core::{Node, NodeContext, NodeError, NodeOutput, Value, ValueExt, INTENT_RESULT};
use chatflow_runtime::{NodeFactory, NodeMetadata};
use std::sync::Arc;

fn classifier_prompt(intents: &[String]) -> String {
    let list = if intents.is_empty() {
        "- unknown".to_string()
    } else {
        intents
            .iter()
            .map(|name| format!("- {}", name))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let fallback = intents.first().map(String::as_str).unwrap_or("unknown");

    format!(
        "## Intent classification\n\n\
         You are an intent classifier, not an assistant. Read the user input and \
         answer with the name of exactly one category.\n\n\
         ### Categories\n{}\n\n\
         ### Rules\n\
         1. Reply with the category name only, spelled exactly as listed.\n\
         2. Do not answer the question or add punctuation.\n\
         3. If unsure, reply: {}\n",
        list, fallback
    )
}

/// Asks a chat model which configured intent the message belongs to and
/// routes along the edge whose handle carries that name.
pub struct IntentClassifierNode {
    model: Arc<dyn ChatModel>,
}

impl IntentClassifierNode {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn intent_names(config: &serde_json::Map<String, Value>) -> Vec<String> {
        config
            .get("intents")
            .and_then(Value::as_array)
            .map(|intents| {
                intents
                    .iter()
                    .filter_map(|i| i.get("name").and_then(Value::as_str))
                    .map(|name| name.trim().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Node for IntentClassifierNode {
    fn node_type(&self) -> &str {
        "intent_classification"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let intents = Self::intent_names(&ctx.config);
        let previous = ctx.primary_input();

        let mut request = agent_request(&ctx);
        let prompt = classifier_prompt(&intents);
        request.system = Some(match request.system.filter(|s| !s.is_empty()) {
            Some(system) => format!("{}\n\n{}", system, prompt),
            None => prompt,
        });

        let answer = tokio::select! {
            answer = self.model.complete(request) => answer,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let intent = match answer {
            Ok(text) => {
                let text = text.trim().to_string();
                if intents.contains(&text) {
                    text
                } else {
                    ctx.events.warn(format!("unrecognised intent {:?}", text));
                    tracing::warn!(
                        "Intent node {} got {:?}, not one of {:?}",
                        ctx.node_id,
                        text,
                        intents
                    );
                    intents.first().cloned().unwrap_or(text)
                }
            }
            Err(e) => {
                tracing::error!("Intent node {} failed: {}", ctx.node_id, e);
                let fallback = intents.first().cloned().unwrap_or_else(|| "error".to_string());
                return Ok(NodeOutput::new()
                    .with_output(ctx.output_key.clone(), e.to_string())
                    .with_output(INTENT_RESULT, fallback)
                    .with_output("previous_output", previous));
            }
        };

        ctx.events.info(format!("intent: {}", intent));
        tracing::info!(
            "Intent node {} classified {:?} as {}",
            ctx.node_id,
            previous.to_text(),
            intent
        );

        Ok(NodeOutput::new()
            .with_output(ctx.output_key.clone(), intent.clone())
            .with_output(INTENT_RESULT, intent)
            .with_output("previous_output", previous))
    }

    fn validate_params(&self, config: &serde_json::Map<String, Value>) -> Vec<String> {
        if Self::intent_names(config).iter().all(|name| name.is_empty()) {
            vec!["intent_classification requires at least one named intent".to_string()]
        } else {
            Vec::new()
        }
    }
}

pub struct IntentClassifierNodeFactory {
    model: Arc<dyn ChatModel>,
}

impl IntentClassifierNodeFactory {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

impl NodeFactory for IntentClassifierNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(IntentClassifierNode::new(self.model.clone())))
    }

    fn node_type(&self) -> &str {
        "intent_classification"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route by the intent a chat model recognises".to_string(),
            category: "ai".to_string(),
            streaming: false,
        }
    }
}
