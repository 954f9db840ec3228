//! Structural coercion of raw JSON arguments to declared parameter types.
//!
//! Lenient in the directions clients commonly get wrong: numbers and
//! booleans sent as strings, integral floats for integers, scalars for
//! strings. Everything else must already have the declared shape.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::schema::ParamType;

#[derive(Debug, Error, PartialEq)]
#[error("cannot convert argument '{param}' to {expected}: got {found}")]
pub struct CoercionError {
    pub param: String,
    pub expected: &'static str,
    pub found: String,
}

/// Converts `value` to the shape of `target`.
pub fn coerce(param: &str, value: Value, target: &ParamType) -> Result<Value, CoercionError> {
    let fail = |value: &Value| CoercionError {
        param: param.to_string(),
        expected: target.label(),
        found: describe(value),
    };

    match (target, value) {
        (ParamType::Any, value) => Ok(value),

        (ParamType::String, Value::String(s)) => Ok(Value::String(s)),
        (ParamType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (ParamType::Enum(variants), Value::String(s)) => {
            if variants.iter().any(|v| *v == s) {
                Ok(Value::String(s))
            } else {
                Err(fail(&Value::String(s)))
            }
        }

        (ParamType::Integer, Value::Number(n)) => integer_from_number(&n)
            .map(Value::Number)
            .ok_or_else(|| fail(&Value::Number(n))),
        (ParamType::Integer, Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .map(Number::from)
                .or_else(|_| trimmed.parse::<u64>().map(Number::from))
                .map(Value::Number)
                .map_err(|_| fail(&Value::String(s.clone())))
        }

        (ParamType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| fail(&Value::String(s.clone()))),

        (ParamType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(fail(&Value::String(s))),
        },

        (ParamType::Array(items), Value::Array(values)) => values
            .into_iter()
            .map(|v| coerce(param, v, items))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),

        (ParamType::Map(values), Value::Object(entries)) => entries
            .into_iter()
            .map(|(k, v)| coerce(param, v, values).map(|v| (k, v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),

        (_, value) => Err(fail(&value)),
    }
}

fn integer_from_number(n: &Number) -> Option<Number> {
    if n.is_i64() || n.is_u64() {
        return Some(n.clone());
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(Number::from(f as i64))
    } else {
        None
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
