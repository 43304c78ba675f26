use async_trait::async_trait;
use chatflow_core::{
    Node, NodeContext, NodeError, NodeOutput, Value, ValueExt, BRANCH_TYPES, CONDITION_RESULT,
};
use chatflow_runtime::{NodeFactory, NodeMetadata};

/// Compares against the id of the node the run started at.
const TRIGGER_FIELD: &str = "triggerType";

const OPERATORS: &[&str] = &[
    "equals",
    "==",
    "not_equals",
    "!=",
    "contains",
    "not_contains",
    "starts_with",
    "ends_with",
    ">",
    "<",
    ">=",
    "<=",
];

/// Evaluate `left <operator> right`. `None` for an unknown operator.
///
/// Text operators compare display text. Ordering operators compare numbers
/// and are false when either side is not numeric.
pub fn evaluate(left: &Value, operator: &str, right: &Value) -> Option<bool> {
    let (a, b) = (left.to_text(), right.to_text());
    let numeric = |cmp: fn(f64, f64) -> bool| match (left.to_number(), right.to_number()) {
        (Some(x), Some(y)) => cmp(x, y),
        _ => false,
    };

    let result = match operator {
        "equals" | "==" => a == b,
        "not_equals" | "!=" => a != b,
        "contains" => a.contains(&b),
        "not_contains" => !a.contains(&b),
        "starts_with" => a.starts_with(&b),
        "ends_with" => a.ends_with(&b),
        ">" => numeric(|x, y| x > y),
        "<" => numeric(|x, y| x < y),
        ">=" => numeric(|x, y| x >= y),
        "<=" => numeric(|x, y| x <= y),
        _ => return None,
    };
    Some(result)
}

/// Two-way router. Reports its decision under `condition_result`; outgoing
/// edges tagged `"true"`/`"false"` pick it up.
pub struct BranchNode {
    node_type: &'static str,
}

impl BranchNode {
    fn compare_data(&self, ctx: &NodeContext, field: &str) -> Value {
        if field == TRIGGER_FIELD {
            return ctx
                .variables
                .get("start_node")
                .cloned()
                .unwrap_or(Value::String(String::new()));
        }

        ctx.variables
            .get(field)
            .cloned()
            .unwrap_or_else(|| ctx.primary_input())
    }
}

#[async_trait]
impl Node for BranchNode {
    fn node_type(&self) -> &str {
        self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let field = ctx.config_str("conditionField").unwrap_or(TRIGGER_FIELD);
        let operator = ctx.config_str("conditionOperator").unwrap_or("equals");
        let expected = ctx.render_value(&ctx.get_config_or("conditionValue", Value::String(String::new())));

        let actual = self.compare_data(&ctx, field);
        let result = evaluate(&actual, operator, &expected).ok_or_else(|| {
            NodeError::Configuration(format!("Unknown condition operator: {}", operator))
        })?;

        tracing::info!(
            "Branch {}: {}={} {} {} -> {}",
            ctx.node_id,
            field,
            actual.to_text(),
            operator,
            expected.to_text(),
            result
        );

        Ok(NodeOutput::new()
            .with_output(ctx.output_key.clone(), result)
            .with_output(CONDITION_RESULT, result))
    }

    fn validate_params(&self, config: &serde_json::Map<String, Value>) -> Vec<String> {
        match config.get("conditionOperator").and_then(Value::as_str) {
            Some(op) if !OPERATORS.contains(&op) => {
                vec![format!("unknown condition operator: {}", op)]
            }
            _ => Vec::new(),
        }
    }
}

pub struct BranchNodeFactory {
    node_type: &'static str,
}

impl BranchNodeFactory {
    pub fn all() -> impl Iterator<Item = Self> {
        BRANCH_TYPES.iter().map(|&node_type| Self { node_type })
    }
}

impl NodeFactory for BranchNodeFactory {
    fn create(&self, _config: &serde_json::Map<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(BranchNode {
            node_type: self.node_type,
        }))
    }

    fn node_type(&self) -> &str {
        self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route along the true or false edge".to_string(),
            category: "condition".to_string(),
            streaming: false,
        }
    }
}
