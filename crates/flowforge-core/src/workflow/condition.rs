//! JEXL evaluation of task `when` conditions.
//!
//! Conditions are evaluated against the context produced by
//! [`ExecutionContext::to_expression_context`](super::context::ExecutionContext::to_expression_context).
//! Trigger payloads and task outputs are passed in as context values and are
//! never spliced into the expression text.

use serde_json::{Value, json};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConditionError {
    #[error("condition '{expression}' failed to evaluate: {message}")]
    EvalFailed { expression: String, message: String },

    #[error("condition context must be a JSON object")]
    InvalidContext,
}

/// JEXL evaluator with a small set of string/collection transforms.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(Value::as_str).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(Value::as_str).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("not", |args: &[Value]| {
                Ok(json!(!truthy(args.first().unwrap_or(&Value::Null))))
            });

        Self { evaluator }
    }

    /// Evaluate `expression` and coerce the result with JavaScript truthiness.
    pub fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, ConditionError> {
        if !context.is_object() {
            return Err(ConditionError::InvalidContext);
        }

        let result = self
            .evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ConditionError::EvalFailed {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;

        Ok(truthy(&result))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator").finish_non_exhaustive()
    }
}

/// Evaluate with a fresh evaluator.
///
/// The JEXL evaluator is neither `Send` nor `Sync`, so callers inside async
/// tasks evaluate through this function instead of holding one across an
/// await point.
pub fn evaluate(expression: &str, context: &Value) -> Result<bool, ConditionError> {
    ConditionEvaluator::new().evaluate(expression, context)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
