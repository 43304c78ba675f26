//! Dynamic values passed between nodes.
//!
//! Flow documents, node configuration, node outputs and variables are all
//! plain JSON, so the engine works on `serde_json::Value` directly and adds
//! the few conversions it needs through [`ValueExt`].

pub use serde_json::Value;

/// Helpers the engine and built-in nodes use on dynamic values.
pub trait ValueExt {
    /// Render as display text: strings without quotes, `null` as empty,
    /// everything else as compact JSON.
    fn to_text(&self) -> String;

    /// Loose truthiness used for branch admission.
    fn is_truthy(&self) -> bool;

    /// Numeric view, accepting numeric strings.
    fn to_number(&self) -> Option<f64>;
}

impl ValueExt for Value {
    fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => other.to_string(),
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}
