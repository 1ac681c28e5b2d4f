//! Inter-task data flow.
//!
//! Contexts are immutable value snapshots: every function here returns a
//! new map and leaves its inputs untouched, since sibling tasks read the
//! same parent context.

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::spec::{JsonMap, TaskSpec, WorkflowSpec};

use super::evaluator::{evaluate_nested, Evaluator};

/// Key under which task results are published.
pub const TASK_KEY: &str = "task";

/// Key holding the execution identity in the initial context.
pub const EXECUTION_KEY: &str = "__execution";

/// Recursively overlay `overlay` onto `target`.
///
/// Nested maps merge key by key; any other value replaces.
pub fn merge_into(target: &mut JsonMap, overlay: &JsonMap) {
    for (key, value) in overlay {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// `in_context` overlaid with `output`, as a new map.
pub fn get_outbound_context(in_context: &JsonMap, output: &JsonMap) -> JsonMap {
    let mut outbound = in_context.clone();
    merge_into(&mut outbound, output);
    outbound
}

/// Evaluate a value, falling back to the literal on failure.
pub fn evaluate_value(evaluator: &dyn Evaluator, value: &Value, context: &JsonMap) -> Value {
    match value {
        Value::String(s) if evaluator.is_expression(value) => {
            match evaluator.evaluate(s, context) {
                Ok(v) => v,
                Err(e) => {
                    warn!(expression = %s, error = %e, "Expression evaluation failed, using literal");
                    value.clone()
                }
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| evaluate_value(evaluator, v, context))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), evaluate_value(evaluator, v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluate a task's input against its in-context.
///
/// Parameters for which `is_required` holds must evaluate cleanly; all
/// others degrade to their literal value.
pub fn evaluate_task_input(
    evaluator: &dyn Evaluator,
    task: &TaskSpec,
    is_required: impl Fn(&str) -> bool,
    context: &JsonMap,
) -> EngineResult<JsonMap> {
    let mut input = JsonMap::new();
    for (name, value) in &task.input {
        let evaluated = if is_required(name) {
            evaluate_nested(evaluator, value, context).map_err(|e| {
                EngineError::Expression(format!(
                    "required parameter '{}' of task '{}': {}",
                    name, task.name, e
                ))
            })?
        } else {
            evaluate_value(evaluator, value, context)
        };
        input.insert(name.clone(), evaluated);
    }
    Ok(input)
}

/// `{"task": {name: result}}`.
pub fn task_result_entry(task_name: &str, result: &Value) -> JsonMap {
    let mut results = JsonMap::new();
    results.insert(task_name.to_string(), result.clone());
    let mut entry = JsonMap::new();
    entry.insert(TASK_KEY.to_string(), Value::Object(results));
    entry
}

/// Output published by a successful task.
///
/// The result is always published under `task.<name>`; `publish`
/// expressions see the in-context with that entry overlaid.
pub fn get_task_output(
    evaluator: &dyn Evaluator,
    task: &TaskSpec,
    result: &Value,
    in_context: &JsonMap,
) -> JsonMap {
    let mut output = task_result_entry(&task.name, result);
    if task.publish.is_empty() {
        return output;
    }

    let scope = get_outbound_context(in_context, &output);
    for (name, expr) in &task.publish {
        output.insert(name.clone(), evaluate_value(evaluator, expr, &scope));
    }
    output
}

/// Validate workflow input and build the context seen by start tasks.
///
/// Returns the input with declared defaults filled in, and the initial
/// context: that input plus `env` and `__execution`.
pub fn initial_context(
    spec: &WorkflowSpec,
    input: &JsonMap,
    env: &JsonMap,
    workflow_execution_id: Uuid,
) -> EngineResult<(JsonMap, JsonMap)> {
    if let Some(unknown) = input
        .keys()
        .find(|k| !spec.input.iter().any(|p| &p.name == *k))
    {
        return Err(EngineError::InvalidInput(format!(
            "Workflow '{}' does not declare input '{}'",
            spec.name, unknown
        )));
    }

    let mut bound = JsonMap::new();
    for param in &spec.input {
        match (input.get(&param.name), &param.default) {
            (Some(value), _) => {
                bound.insert(param.name.clone(), value.clone());
            }
            (None, Some(default)) => {
                bound.insert(param.name.clone(), default.clone());
            }
            (None, None) => {
                return Err(EngineError::InvalidInput(format!(
                    "Workflow '{}' requires input '{}'",
                    spec.name, param.name
                )));
            }
        }
    }

    let mut context = bound.clone();
    context.insert("env".to_string(), Value::Object(env.clone()));
    context.insert(
        EXECUTION_KEY.to_string(),
        serde_json::json!({"id": workflow_execution_id.to_string(), "name": spec.name}),
    );
    Ok((bound, context))
}

/// Evaluate the workflow's output block against the terminal context.
pub fn evaluate_output(evaluator: &dyn Evaluator, spec: &WorkflowSpec, context: &JsonMap) -> JsonMap {
    spec.output
        .iter()
        .map(|(k, v)| (k.clone(), evaluate_value(evaluator, v, context)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluator::JinjaEvaluator;
    use crate::spec::InputParam;
    use serde_json::json;

    fn map(v: Value) -> JsonMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_outbound_context_does_not_mutate_input() {
        let ctx = map(json!({"a": 1, "task": {"t1": "x"}}));
        let before = ctx.clone();

        let out = get_outbound_context(&ctx, &map(json!({"b": 2, "task": {"t2": "y"}})));

        assert_eq!(ctx, before);
        assert_eq!(out, map(json!({"a": 1, "b": 2, "task": {"t1": "x", "t2": "y"}})));
    }

    #[test]
    fn test_merge_replaces_scalars() {
        let mut target = map(json!({"a": {"b": 1}, "c": [1]}));
        merge_into(&mut target, &map(json!({"a": 5, "c": [2]})));
        assert_eq!(target, map(json!({"a": 5, "c": [2]})));
    }

    #[test]
    fn test_evaluate_value_degrades_to_literal() {
        let ev = JinjaEvaluator::new();
        let ctx = map(json!({"x": 1}));
        assert_eq!(evaluate_value(&ev, &json!("{{ x + 1 }}"), &ctx), json!(2));
        assert_eq!(
            evaluate_value(&ev, &json!("{{ missing.deep }}"), &ctx),
            json!("{{ missing.deep }}")
        );
    }

    #[test]
    fn test_required_parameter_failure_is_error() {
        let ev = JinjaEvaluator::new();
        let mut task = TaskSpec::action("t", "std.echo");
        task.input.insert("output".to_string(), json!("{{ missing.deep }}"));
        task.input.insert("note".to_string(), json!("{{ missing.deep }}"));

        let lenient = evaluate_task_input(&ev, &task, |_| false, &JsonMap::new()).unwrap();
        assert_eq!(lenient["output"], json!("{{ missing.deep }}"));

        let strict = evaluate_task_input(&ev, &task, |p| p == "output", &JsonMap::new());
        assert!(matches!(strict, Err(EngineError::Expression(_))));
    }

    #[test]
    fn test_task_output_publishes_against_result() {
        let ev = JinjaEvaluator::new();
        let mut task = TaskSpec::action("t1", "std.echo");
        task.publish.insert("doubled".to_string(), json!("{{ task.t1 * 2 }}"));
        task.publish.insert("seen".to_string(), json!("{{ x }}"));

        let output = get_task_output(&ev, &task, &json!(21), &map(json!({"x": "in"})));
        assert_eq!(output, map(json!({"task": {"t1": 21}, "doubled": 42, "seen": "in"})));
    }

    #[test]
    fn test_initial_context() {
        let spec = WorkflowSpec {
            name: "wf".to_string(),
            namespace: String::new(),
            version: None,
            description: None,
            input: vec![InputParam::required("a"), InputParam::with_default("b", json!(2))],
            output: JsonMap::new(),
            tasks: vec![],
        };
        let id = Uuid::new_v4();

        let (input, ctx) =
            initial_context(&spec, &map(json!({"a": 1})), &map(json!({"k": "v"})), id).unwrap();
        assert_eq!(input, map(json!({"a": 1, "b": 2})));
        assert_eq!(ctx["env"], json!({"k": "v"}));
        assert_eq!(ctx[EXECUTION_KEY]["id"], json!(id.to_string()));

        let missing = initial_context(&spec, &JsonMap::new(), &JsonMap::new(), id);
        assert!(matches!(missing, Err(EngineError::InvalidInput(_))));

        let unknown = initial_context(&spec, &map(json!({"a": 1, "z": 0})), &JsonMap::new(), id);
        assert!(matches!(unknown, Err(EngineError::InvalidInput(_))));
    }
}
