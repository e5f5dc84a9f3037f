//! Template rendering for instructions, component names and labels
//!
//! Templates use `{{ expression }}` placeholders. An expression is a dotted
//! path into the variables (`user.address.city`, `rows.0.id`), optionally
//! wrapped in the `toJson(..)` helper which always emits JSON text.

use crate::adapter::Row;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("malformed expression '{0}'")]
    Malformed(String),

    #[error("failed to serialize '{0}': {1}")]
    Serialize(String, String),
}

/// Renders a template string against a variable map
///
/// Implementations must be pure functions of their inputs.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &Row) -> Result<String, TemplateError>;
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("valid placeholder regex"))
}

fn helper_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^toJson\(\s*([^()]*?)\s*\)$").expect("valid helper regex"))
}

/// Default renderer with `{{ path }}` substitution
///
/// String values are inserted raw, anything else as compact JSON.
#[derive(Debug, Clone, Default)]
pub struct SimpleTemplateRenderer;

impl SimpleTemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(&self, expression: &str, vars: &Row) -> Result<String, TemplateError> {
        if expression.is_empty() {
            return Err(TemplateError::Malformed(expression.to_string()));
        }

        if let Some(caps) = helper_regex().captures(expression) {
            let path = &caps[1];
            let value = lookup(path, vars)?;
            return serde_json::to_string(value)
                .map_err(|e| TemplateError::Serialize(path.to_string(), e.to_string()));
        }

        if expression.contains('(') || expression.contains(' ') {
            return Err(TemplateError::Malformed(expression.to_string()));
        }

        let value = lookup(expression, vars)?;
        match value {
            Value::String(s) => Ok(s.clone()),
            other => serde_json::to_string(other)
                .map_err(|e| TemplateError::Serialize(expression.to_string(), e.to_string())),
        }
    }
}

impl TemplateRenderer for SimpleTemplateRenderer {
    fn render(&self, template: &str, vars: &Row) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let whole = caps.get(0).ok_or_else(|| TemplateError::Malformed(template.to_string()))?;
            output.push_str(&template[last..whole.start()]);
            output.push_str(&self.evaluate(&caps[1], vars)?);
            last = whole.end();
        }

        output.push_str(&template[last..]);
        Ok(output)
    }
}

/// Resolve a dotted path. Numeric segments index into arrays.
fn lookup<'a>(path: &str, vars: &'a Row) -> Result<&'a Value, TemplateError> {
    let mut segments = path.split('.');
    let head = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TemplateError::Malformed(path.to_string()))?;

    let mut current = vars
        .get(head)
        .ok_or_else(|| TemplateError::UnknownVariable(path.to_string()))?;

    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| TemplateError::UnknownVariable(path.to_string()))?;
    }

    Ok(current)
}
