use crate::{Value, ValueExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// `{{ name }}` or `{{ name.field.0 }}`
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}").unwrap()
});

/// Renders templates found in node configuration against the run variables.
pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, template: &str, variables: &HashMap<String, Value>) -> Value;

    /// Resolve every string inside a JSON structure.
    fn resolve_value(&self, value: &Value, variables: &HashMap<String, Value>) -> Value {
        match value {
            Value::String(s) => self.resolve(s, variables),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, variables))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v, variables)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Default resolver: substitutes `{{ path }}` placeholders.
///
/// A template that is exactly one placeholder resolves to the referenced
/// value with its JSON type intact. If any placeholder cannot be resolved the
/// template is returned unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderResolver;

impl PlaceholderResolver {
    fn lookup<'a>(path: &str, variables: &'a HashMap<String, Value>) -> Option<&'a Value> {
        let mut segments = path.split('.');
        let mut current = variables.get(segments.next()?)?;

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current)
    }
}

impl TemplateResolver for PlaceholderResolver {
    fn resolve(&self, template: &str, variables: &HashMap<String, Value>) -> Value {
        if let Some(caps) = PLACEHOLDER.captures(template.trim()) {
            let whole = caps.get(0).map(|m| m.as_str().len()).unwrap_or(0);
            if whole == template.trim().len() {
                return Self::lookup(&caps[1], variables)
                    .cloned()
                    .unwrap_or_else(|| Value::String(template.to_string()));
            }
        }

        let mut missing = false;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
            match Self::lookup(&caps[1], variables) {
                Some(value) => value.to_text(),
                None => {
                    missing = true;
                    String::new()
                }
            }
        });

        if missing {
            tracing::debug!(template, "template references unknown variables, left unrendered");
            return Value::String(template.to_string());
        }

        Value::String(rendered.into_owned())
    }
}
