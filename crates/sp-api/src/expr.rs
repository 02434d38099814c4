use std::collections::BTreeMap;

use rhai::{Array, Dynamic, Engine, ImmutableString, Map, Scope, FLOAT, INT};
use sp_core::{PlayerError, Value};

/// Evaluates `expr` against a read-only copy of the variables.
///
/// Variables whose names are not valid identifiers are not visible to the
/// expression. Unknown names are an error.
pub fn evaluate(expr: &str, variables: &BTreeMap<String, Value>) -> Result<Value, PlayerError> {
    let mut scope = Scope::new();
    for (name, value) in variables {
        if is_identifier(name) {
            scope.push_dynamic(name.clone(), value_to_dynamic(value));
        }
    }

    let result = expression_engine()
        .eval_expression_with_scope::<Dynamic>(&mut scope, expr)
        .map_err(|error| {
            PlayerError::command("expr", format!("\"{}\" failed to evaluate: {}", expr, error))
        })?;
    dynamic_to_value(result)
}

/// Evaluates `expr` and requires a boolean result.
pub fn evaluate_condition(
    expr: &str,
    variables: &BTreeMap<String, Value>,
) -> Result<bool, PlayerError> {
    match evaluate(expr, variables)? {
        Value::Bool(value) => Ok(value),
        other => Err(PlayerError::command(
            "expr",
            format!(
                "\"{}\" must evaluate to a boolean, got {}",
                expr,
                other.type_name()
            ),
        )),
    }
}

/// Parses without running; used by command validation.
pub fn check_syntax(expr: &str) -> Result<(), String> {
    expression_engine()
        .compile_expression(expr)
        .map(|_| ())
        .map_err(|error| error.to_string())
}

fn expression_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    engine.set_max_operations(100_000);
    engine
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

pub(crate) fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Bool(value) => Dynamic::from_bool(*value),
        Value::Number(value) => Dynamic::from_float(*value as FLOAT),
        Value::String(value) => Dynamic::from(value.clone()),
        Value::Array(values) => {
            Dynamic::from_array(values.iter().map(value_to_dynamic).collect::<Array>())
        }
        Value::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.clone().into(), value_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

pub(crate) fn dynamic_to_value(value: Dynamic) -> Result<Value, PlayerError> {
    if value.is::<bool>() {
        return Ok(Value::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(Value::Number(value.cast::<INT>() as f64));
    }
    if value.is::<FLOAT>() {
        let number = value.cast::<FLOAT>();
        if !number.is_finite() {
            return Err(PlayerError::command(
                "expr",
                format!("expression produced non-finite number {}", number),
            ));
        }
        return Ok(Value::Number(number));
    }
    if value.is::<ImmutableString>() {
        return Ok(Value::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_value(item)?);
        }
        return Ok(Value::Array(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_value(value)?);
        }
        return Ok(Value::Map(out));
    }

    Err(PlayerError::command(
        "expr",
        format!("unsupported expression result type {}", value.type_name()),
    ))
}
