//! Typed access to JSON hyperparameter values.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{MlrError, Result};

fn invalid(name: &str, value: &Value, expected: &str) -> MlrError {
    MlrError::Config(format!(
        "Invalid value {} for parameter '{}', expected {}",
        value, name, expected
    ))
}

pub fn as_bool(name: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| invalid(name, value, "a boolean"))
}

pub fn as_f64(name: &str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| invalid(name, value, "a number"))
}

pub fn as_positive_f64(name: &str, value: &Value) -> Result<f64> {
    match value.as_f64() {
        Some(v) if v > 0.0 => Ok(v),
        _ => Err(invalid(name, value, "a positive number")),
    }
}

pub fn as_usize(name: &str, value: &Value) -> Result<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .map(|v| v as usize)
            .ok_or_else(|| invalid(name, value, "a non-negative integer")),
        _ => Err(invalid(name, value, "a non-negative integer")),
    }
}

/// `null` maps to `None`.
pub fn as_opt_usize(name: &str, value: &Value) -> Result<Option<usize>> {
    match value {
        Value::Null => Ok(None),
        other => as_usize(name, other).map(Some),
    }
}

pub fn as_string(name: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(name, value, "a string"))
}

/// Deserialize into an enum or struct.
pub fn as_typed<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|err| {
        MlrError::Config(format!("Invalid value {} for parameter '{}': {}", value, name, err))
    })
}

pub fn unknown(owner: &str, name: &str) -> MlrError {
    MlrError::Config(format!("Invalid parameter '{}' for {}", name, owner))
}
