//! Expression evaluation for task inputs, guards and policies.
//!
//! The engine only talks to the [`Evaluator`] trait so the expression
//! language can be swapped; [`JinjaEvaluator`] is the default.

use serde_json::Value;

use crate::error::EngineResult;
use crate::spec::JsonMap;
use crate::template::{contains_template_syntax, TemplateRenderer};

/// Pluggable expression language.
pub trait Evaluator: Send + Sync {
    /// Whether `value` is an expression rather than a literal.
    fn is_expression(&self, value: &Value) -> bool;

    /// Evaluate an expression string against `context`.
    fn evaluate(&self, expression: &str, context: &JsonMap) -> EngineResult<Value>;

    /// Evaluate a guard or `break_on` condition.
    fn evaluate_condition(&self, expression: &str, context: &JsonMap) -> EngineResult<bool>;
}

/// Jinja2-style evaluator backed by minijinja.
///
/// `{{ expr }}` keeps the result type, mixed text renders to a string.
#[derive(Debug, Default)]
pub struct JinjaEvaluator {
    renderer: TemplateRenderer,
}

impl JinjaEvaluator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Evaluator for JinjaEvaluator {
    fn is_expression(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => contains_template_syntax(s),
            Value::Array(items) => items.iter().any(|v| self.is_expression(v)),
            Value::Object(map) => map.values().any(|v| self.is_expression(v)),
            _ => false,
        }
    }

    fn evaluate(&self, expression: &str, context: &JsonMap) -> EngineResult<Value> {
        self.renderer.evaluate(expression, context)
    }

    fn evaluate_condition(&self, expression: &str, context: &JsonMap) -> EngineResult<bool> {
        self.renderer.evaluate_condition(expression, context)
    }
}

/// Evaluate every expression nested inside `value`.
///
/// Fails on the first expression that does not evaluate.
pub fn evaluate_nested(
    evaluator: &dyn Evaluator,
    value: &Value,
    context: &JsonMap,
) -> EngineResult<Value> {
    match value {
        Value::String(s) if evaluator.is_expression(value) => evaluator.evaluate(s, context),
        Value::Array(items) => items
            .iter()
            .map(|v| evaluate_nested(evaluator, v, context))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = JsonMap::new();
            for (k, v) in map {
                out.insert(k.clone(), evaluate_nested(evaluator, v, context)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
