//! Explicit conversions between scalar kinds.

use trellis_foundation::{Error, Result, Value, format_number};

use crate::operator::CastType;

/// Converts a value to the requested kind.
///
/// | from \ to | number | string | bool |
/// |---|---|---|---|
/// | number | identity | integral values drop `.0` | `!= 0` |
/// | string | trimmed parse, empty rejected | identity | `"true"`/`"1"` |
/// | bool | `1` / `0` | `"true"` / `"false"` | identity |
///
/// Fact references cast to string as their identity. Everything else fails.
///
/// # Errors
///
/// Returns [`trellis_foundation::ErrorKind::CastFailed`] when the conversion is
/// not defined for the value.
pub fn cast(value: &Value, target: CastType) -> Result<Value> {
    match target {
        CastType::Number => to_number(value).map(Value::Number),
        CastType::String => to_string(value).map(Value::from),
        CastType::Bool => to_bool(value).map(Value::Bool),
    }
}

fn to_number(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(Error::cast_failed("empty string", "number"));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| Error::cast_failed(format!("{s:?}"), "number"))
        }
        other => Err(Error::cast_failed(other.to_string(), "number")),
    }
}

fn to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string()),
        Value::Number(n) => Ok(format_number(*n)),
        Value::Bool(b) => Ok(b.to_string()),
        Value::FactRef(id) => Ok(id.to_string()),
        Value::Fact(f) => Ok(f.id().to_string()),
        other => Err(Error::cast_failed(other.to_string(), "string")),
    }
}

fn to_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::String(s) => Ok(matches!(s.trim(), "true" | "1")),
        other => Err(Error::cast_failed(other.to_string(), "bool")),
    }
}
