//! JSON mapping for diagnostics and interop with JSON-codec channels.
//!
//! The binary codec is the wire format; this module exists for the places a
//! human or a JSON-speaking peer looks at a value. The mapping is lossy in
//! the JSON direction (bytes become arrays of numbers, enums and structs
//! lose their tags), so it is not used for round-tripping.

use std::fmt;

use serde_json::{Number, json};

use crate::value::{Value, ValueMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonError {
    /// JSON object keys must be strings.
    NonStringKey,
    /// JSON has no representation for NaN or infinity.
    NonFiniteNumber,
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::NonStringKey => write!(f, "map key is not a string"),
            JsonError::NonFiniteNumber => write!(f, "non-finite float has no JSON form"),
        }
    }
}

impl std::error::Error for JsonError {}

/// Renders a value as JSON.
pub fn to_json(value: &Value) -> Result<serde_json::Value, JsonError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(json!(b)),
        Value::Int64(i) => Ok(json!(i)),
        Value::Float64(d) => Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .ok_or(JsonError::NonFiniteNumber),
        Value::String(s) => Ok(json!(s)),
        Value::Bytes(b) => Ok(serde_json::Value::Array(
            b.iter().map(|byte| json!(byte)).collect(),
        )),
        Value::List(items) | Value::Struct(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_json(item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Map(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map.iter() {
                let key = k.as_str().map_err(|_| JsonError::NonStringKey)?;
                out.insert(key.to_string(), to_json(v)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::Enum(ordinal) => Ok(json!(ordinal)),
    }
}

/// Builds a value from JSON. Total: every JSON document maps to a value.
/// Numbers become `Int64` when they fit, `Float64` otherwise.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(from_json).collect()),
        serde_json::Value::Object(fields) => {
            let mut map = ValueMap::new();
            for (k, v) in fields {
                map.insert(Value::String(k.clone()), from_json(v));
            }
            Value::Map(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_value_renders_as_json() {
        let mut map = ValueMap::new();
        map.insert(Value::from("n"), Value::Int64(1));
        map.insert(Value::from("raw"), Value::Bytes(vec![7, 8]));
        let rendered = to_json(&Value::Map(map)).unwrap();
        assert_eq!(rendered, json!({ "n": 1, "raw": [7, 8] }));
    }

    #[test]
    fn non_string_key_is_rejected() {
        let mut map = ValueMap::new();
        map.insert(Value::Int64(1), Value::Null);
        assert_eq!(to_json(&Value::Map(map)), Err(JsonError::NonStringKey));
    }

    #[test]
    fn nan_is_rejected() {
        assert_eq!(to_json(&Value::Float64(f64::NAN)), Err(JsonError::NonFiniteNumber));
    }

    #[test]
    fn json_numbers_prefer_int64() {
        assert_eq!(from_json(&json!(5)), Value::Int64(5));
        assert_eq!(from_json(&json!(2.5)), Value::Float64(2.5));
    }

    #[test]
    fn json_object_becomes_map() {
        let v = from_json(&json!({ "method": "echoInt", "args": [5] }));
        let map = v.as_map().unwrap();
        assert_eq!(map.get(&Value::from("method")), Some(&Value::from("echoInt")));
        assert_eq!(
            map.get(&Value::from("args")),
            Some(&Value::List(vec![Value::Int64(5)]))
        );
    }
}
