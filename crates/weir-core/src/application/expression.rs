use crate::error::Failure;
use crate::types::Variables;
use serde_json::Value;

/// Evaluates deployment-time expressions against scope variables
///
/// The engine asks for values (variable mappings, input collections, job
/// types) and for booleans (flow conditions, completion conditions). Both
/// go through this seam so the expression language can be swapped out.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression to a JSON value
    fn evaluate(&self, expression: &str, scope: &Variables) -> Result<Value, Failure>;

    /// Evaluate an expression to a boolean, using JSON truthiness: `false`,
    /// `null`, empty strings/arrays/objects are falsy, everything else truthy.
    fn evaluate_bool(&self, expression: &str, scope: &Variables) -> Result<bool, Failure> {
        let value = self.evaluate(expression, scope)?;
        Ok(is_truthy(&value))
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// The default evaluator, backed by JMESPath
pub struct JmespathEvaluator;

impl ExpressionEvaluator for JmespathEvaluator {
    fn evaluate(&self, expression: &str, scope: &Variables) -> Result<Value, Failure> {
        let compiled = jmespath::compile(expression).map_err(|err| {
            Failure::expression(format!("failed to compile expression '{expression}': {err}"))
        })?;

        let document = serde_json::to_string(&scope.as_value()).map_err(|err| {
            Failure::expression(format!("failed to serialize scope variables: {err}"))
        })?;
        let data = jmespath::Variable::from_json(&document).map_err(|err| {
            Failure::expression(format!("failed to load scope variables: {err}"))
        })?;

        let result = compiled.search(data).map_err(|err| {
            Failure::expression(format!("failed to evaluate expression '{expression}': {err}"))
        })?;

        serde_json::to_value(result.as_ref()).map_err(|err| {
            Failure::expression(format!(
                "expression '{expression}' produced an unserializable result: {err}"
            ))
        })
    }
}
