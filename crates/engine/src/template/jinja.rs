//! Jinja2-style template rendering using minijinja.
//!
//! A string that is exactly one `{{ expression }}` is evaluated as an
//! expression and keeps its type (numbers, lists, maps). Anything else
//! containing template syntax renders to a string, with null shown as
//! `None`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use minijinja::{
    escape_formatter, value::ValueKind, Environment, Error, ErrorKind, Output, State, Value,
};
use std::fmt::Write;

use crate::error::{EngineError, EngineResult};

type Context = serde_json::Map<String, serde_json::Value>;

/// Template renderer with custom filters.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

impl TemplateRenderer {
    /// Create a new template renderer with custom filters.
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.add_filter("b64encode", filter_b64encode);
        env.add_filter("b64decode", filter_b64decode);
        env.add_filter("tojson", filter_tojson);
        env.add_filter("fromjson", filter_fromjson);
        env.add_filter("default", filter_default);
        env.add_filter("keys", filter_keys);
        env.add_filter("values", filter_values);
        env.set_formatter(format_output);

        Self { env }
    }

    /// Render a template string with the given context.
    pub fn render(&self, template: &str, context: &Context) -> EngineResult<String> {
        if !contains_template_syntax(template) {
            return Ok(template.to_string());
        }

        let ctx = json_to_value(context);

        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| EngineError::Template(format!("Template parse error: {}", e)))?;

        tmpl.render(ctx)
            .map_err(|e| EngineError::Template(format!("Template render error: {}", e)))
    }

    /// Evaluate a bare expression (no delimiters) to a JSON value.
    pub fn eval_expression(&self, expression: &str, context: &Context) -> EngineResult<serde_json::Value> {
        let expr = self
            .env
            .compile_expression(expression)
            .map_err(|e| EngineError::Expression(format!("'{}': {}", expression, e)))?;
        let value = expr
            .eval(json_to_value(context))
            .map_err(|e| EngineError::Expression(format!("'{}': {}", expression, e)))?;
        minijinja_to_json(&value)
    }

    /// Evaluate a string that may contain template syntax.
    ///
    /// A single `{{ expr }}` keeps the expression's type; mixed text
    /// renders to a string; plain text is returned unchanged.
    pub fn evaluate(&self, template: &str, context: &Context) -> EngineResult<serde_json::Value> {
        match single_expression(template) {
            Some(expr) => self.eval_expression(expr, context),
            None if contains_template_syntax(template) => {
                self.render(template, context).map(serde_json::Value::String)
            }
            None => Ok(serde_json::Value::String(template.to_string())),
        }
    }

    /// Render a nested structure (dict or list) recursively.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &Context,
    ) -> EngineResult<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => self.evaluate(s, context),
            serde_json::Value::Object(map) => {
                let mut result = serde_json::Map::new();
                for (k, v) in map {
                    let rendered_key = self.render(k, context)?;
                    let rendered_value = self.render_value(v, context)?;
                    result.insert(rendered_key, rendered_value);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(arr) => {
                let result: Result<Vec<_>, _> =
                    arr.iter().map(|v| self.render_value(v, context)).collect();
                Ok(serde_json::Value::Array(result?))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Evaluate a condition expression, with or without `{{ }}`.
    pub fn evaluate_condition(&self, condition: &str, context: &Context) -> EngineResult<bool> {
        if let Some(expr) = single_expression(condition) {
            return self.eval_expression(expr, context).map(|v| is_truthy(&v));
        }
        if contains_template_syntax(condition) {
            let rendered = self.render(condition, context)?;
            let trimmed = rendered.trim().to_lowercase();
            return Ok(matches!(trimmed.as_str(), "true" | "1" | "yes"));
        }
        self.eval_expression(condition, context)
            .map(|v| is_truthy(&v))
    }
}

/// Check if a string contains Jinja2 template syntax.
pub fn contains_template_syntax(s: &str) -> bool {
    (s.contains("{{") && s.contains("}}")) || (s.contains("{%") && s.contains("%}"))
}

/// The inner expression if `s` is exactly one `{{ ... }}` block.
fn single_expression(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") || inner.trim().is_empty() {
        return None;
    }
    Some(inner.trim())
}

/// Jinja truthiness over JSON values.
fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn json_to_value(json: &Context) -> Value {
    // JSON null maps to `none`
    Value::from_serialize(json)
}

fn minijinja_to_json(value: &Value) -> EngineResult<serde_json::Value> {
    if value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::to_value(value)
        .map_err(|e| EngineError::Expression(format!("unrepresentable result: {}", e)))
}

fn format_output(out: &mut Output, state: &State, value: &Value) -> Result<(), Error> {
    if value.is_none() {
        return out.write_str("None").map_err(Error::from);
    }
    escape_formatter(out, state, value)
}

fn invalid(message: String) -> Error {
    Error::new(ErrorKind::InvalidOperation, message)
}

// Filters

fn filter_b64encode(value: &Value) -> String {
    BASE64.encode(value.to_string())
}

fn filter_b64decode(value: &Value) -> Result<String, Error> {
    let bytes = BASE64
        .decode(value.to_string())
        .map_err(|e| invalid(format!("b64decode: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("b64decode: {}", e)))
}

fn filter_tojson(value: &Value) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|e| invalid(format!("tojson: {}", e)))
}

fn filter_fromjson(value: &Value) -> Result<Value, Error> {
    let parsed: serde_json::Value = serde_json::from_str(&value.to_string())
        .map_err(|e| invalid(format!("fromjson: {}", e)))?;
    Ok(Value::from_serialize(&parsed))
}

/// Like jinja's `default`, but also replaces `none`.
fn filter_default(value: &Value, fallback: Option<&Value>) -> Value {
    match fallback {
        _ if !value.is_undefined() && !value.is_none() => value.clone(),
        Some(fallback) => fallback.clone(),
        None => Value::from(""),
    }
}

fn filter_keys(value: &Value) -> Result<Vec<Value>, Error> {
    if value.kind() != ValueKind::Map {
        return Err(invalid(format!("keys: expected a mapping, got {:?}", value.kind())));
    }
    Ok(value.try_iter()?.collect())
}

fn filter_values(value: &Value) -> Result<Vec<Value>, Error> {
    filter_keys(value)?
        .iter()
        .map(|key| value.get_item(key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_context() -> Context {
        let mut ctx = Context::new();
        ctx.insert("name".to_string(), serde_json::json!("Alice"));
        ctx.insert("age".to_string(), serde_json::json!(30));
        ctx.insert("ratio".to_string(), serde_json::json!(0.5));
        ctx.insert("active".to_string(), serde_json::json!(true));
        ctx.insert("nothing".to_string(), serde_json::Value::Null);
        ctx.insert(
            "items".to_string(),
            serde_json::json!(["apple", "banana", "cherry"]),
        );
        ctx.insert(
            "user".to_string(),
            serde_json::json!({"email": "alice@example.com", "id": 123}),
        );
        ctx
    }

    #[test]
    fn test_simple_variable() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Hello, {{ name }}!", &make_context()).unwrap();
        assert_eq!(result, "Hello, Alice!");
    }

    #[test]
    fn test_no_template() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("Plain text", &make_context()).unwrap();
        assert_eq!(result, "Plain text");
    }

    #[test]
    fn test_single_expression_keeps_type() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();

        assert_eq!(renderer.evaluate("{{ age }}", &ctx).unwrap(), serde_json::json!(30));
        assert_eq!(renderer.evaluate("{{ ratio }}", &ctx).unwrap(), serde_json::json!(0.5));
        assert_eq!(
            renderer.evaluate("{{ items }}", &ctx).unwrap(),
            serde_json::json!(["apple", "banana", "cherry"])
        );
        assert_eq!(
            renderer.evaluate("{{ user }}", &ctx).unwrap(),
            serde_json::json!({"email": "alice@example.com", "id": 123})
        );
        assert_eq!(renderer.evaluate("{{ age > 25 }}", &ctx).unwrap(), serde_json::json!(true));
    }

    #[test]
    fn test_mixed_template_renders_string() {
        let renderer = TemplateRenderer::new();
        let result = renderer
            .evaluate("{{ age }},{{ user.id }}", &make_context())
            .unwrap();
        assert_eq!(result, serde_json::json!("30,123"));
    }

    #[test]
    fn test_null_renders_as_none() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();
        assert_eq!(renderer.render("{{ nothing }}", &ctx).unwrap(), "None");
        assert_eq!(renderer.render("[{{ nothing }}|{{ name }}]", &ctx).unwrap(), "[None|Alice]");
        assert_eq!(renderer.evaluate("{{ nothing }}", &ctx).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_b64encode_filter() {
        let renderer = TemplateRenderer::new();
        let result = renderer.render("{{ name | b64encode }}", &make_context()).unwrap();
        assert_eq!(result, "QWxpY2U=");
    }

    #[test]
    fn test_default_filter() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();

        let result = renderer
            .render("{{ missing | default('fallback') }}", &ctx)
            .unwrap();
        assert_eq!(result, "fallback");

        let result = renderer.render("{{ nothing | default('x') }}", &ctx).unwrap();
        assert_eq!(result, "x");
    }

    #[test]
    fn test_tojson_fromjson_filters() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();

        let result = renderer.evaluate("{{ user | tojson | fromjson }}", &ctx).unwrap();
        assert_eq!(result["id"], serde_json::json!(123));
    }

    #[test]
    fn test_evaluate_condition() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();

        assert!(renderer.evaluate_condition("age > 25", &ctx).unwrap());
        assert!(!renderer.evaluate_condition("{{ age < 25 }}", &ctx).unwrap());
        assert!(renderer.evaluate_condition("active", &ctx).unwrap());
        assert!(!renderer.evaluate_condition("nothing", &ctx).unwrap());
    }

    #[test]
    fn test_invalid_expression_is_error() {
        let renderer = TemplateRenderer::new();
        let ctx = make_context();

        assert!(renderer.evaluate("{{ age + }}", &ctx).is_err());
        assert!(renderer.evaluate("{{ missing.field }}", &ctx).is_err());
    }

    #[test]
    fn test_render_value_nested() {
        let renderer = TemplateRenderer::new();
        let value = serde_json::json!({
            "greeting": "Hello, {{ name }}!",
            "info": {
                "age": "{{ age }}",
                "tags": ["{{ items | first }}", 7]
            }
        });

        let result = renderer.render_value(&value, &make_context()).unwrap();
        assert_eq!(result["greeting"], "Hello, Alice!");
        assert_eq!(result["info"]["age"], serde_json::json!(30));
        assert_eq!(result["info"]["tags"], serde_json::json!(["apple", 7]));
    }
}
