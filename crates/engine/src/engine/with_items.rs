//! With-items fan-out.
//!
//! One action execution per element, at most `concurrency` in flight.
//! The task completes once every dispatched element has reported; its
//! result is the list of element results in item order.

use serde_json::Value;

use crate::db::models::WithItemsProgress;
use crate::error::{EngineError, EngineResult};
use crate::spec::{JsonMap, WithItemsSpec};

use super::data_flow::evaluate_value;
use super::evaluator::Evaluator;
use super::policies::Outcome;

/// Context key holding the element index.
pub const INDEX_KEY: &str = "_index";

/// Evaluate the `items` collection of a task.
pub fn evaluate_items(
    evaluator: &dyn Evaluator,
    spec: &WithItemsSpec,
    context: &JsonMap,
) -> EngineResult<Vec<Value>> {
    let items = match &spec.items {
        Value::String(expr) if evaluator.is_expression(&spec.items) => {
            evaluator.evaluate(expr, context)?
        }
        other => evaluate_value(evaluator, other, context),
    };
    match items {
        Value::Array(items) => Ok(items),
        other => Err(EngineError::Expression(format!(
            "with_items must produce a list, got {}",
            other
        ))),
    }
}

/// The context one element's input is evaluated against.
pub fn item_context(in_context: &JsonMap, var: &str, item: &Value, index: usize) -> JsonMap {
    let mut ctx = in_context.clone();
    ctx.insert(var.to_string(), item.clone());
    ctx.insert(INDEX_KEY.to_string(), Value::from(index));
    ctx
}

impl WithItemsProgress {
    pub fn new(items: Vec<Value>) -> Self {
        let results = vec![None; items.len()];
        Self {
            items,
            next_index: 0,
            running: 0,
            results,
            failed: false,
        }
    }

    /// Claim the next elements to dispatch, up to the concurrency limit.
    ///
    /// Nothing new is dispatched once an element has failed.
    pub fn next_batch(&mut self, concurrency: Option<usize>) -> Vec<(usize, Value)> {
        let limit = concurrency.map(|c| c.max(1)).unwrap_or(usize::MAX);
        let mut batch = Vec::new();
        while !self.failed && self.running < limit && self.next_index < self.items.len() {
            batch.push((self.next_index, self.items[self.next_index].clone()));
            self.next_index += 1;
            self.running += 1;
        }
        batch
    }

    /// Record one element's completion.
    pub fn record(&mut self, index: usize, outcome: Outcome, result: Value) {
        self.running = self.running.saturating_sub(1);
        if let Some(slot) = self.results.get_mut(index) {
            *slot = Some(result);
        }
        if outcome == Outcome::Error {
            self.failed = true;
        }
    }

    /// No element is in flight and nothing more will be dispatched.
    pub fn is_complete(&self) -> bool {
        self.running == 0 && (self.failed || self.next_index >= self.items.len())
    }

    pub fn outcome(&self) -> Outcome {
        if self.failed {
            Outcome::Error
        } else {
            Outcome::Success
        }
    }

    /// Element results in item order; missing results are null.
    pub fn aggregate(&self) -> Value {
        Value::Array(
            self.results
                .iter()
                .map(|r| r.clone().unwrap_or(Value::Null))
                .collect(),
        )
    }
}
