//! JSON interop.
//!
//! Import sources and fixtures are usually JSON. Numbers must be integers
//! that fit in an `i64`; byte strings render as arrays of integers.

use crate::error::{CodecError, CodecResult};
use crate::value::{Object, Value};
use serde_json::Value as Json;

/// Parses a JSON document into a [`Value`].
///
/// # Errors
///
/// Returns an error for malformed JSON, fractional numbers, or integers
/// outside the `i64` range.
pub fn from_json_str(input: &str) -> CodecResult<Value> {
    let json: Json =
        serde_json::from_str(input).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    Value::try_from(json)
}

/// Renders a [`Value`] as compact JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_json_string(value: &Value) -> CodecResult<String> {
    serde_json::to_string(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

impl TryFrom<Json> for Value {
    type Error = CodecError;

    fn try_from(json: Json) -> CodecResult<Self> {
        Ok(match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if n.is_u64() {
                    return Err(CodecError::IntegerOverflow);
                } else {
                    return Err(CodecError::FloatForbidden);
                }
            }
            Json::String(s) => Value::Text(s),
            Json::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::try_from)
                    .collect::<CodecResult<_>>()?,
            ),
            Json::Object(map) => {
                let mut object = Object::new();
                for (k, v) in map {
                    object.insert(k, Value::try_from(v)?);
                }
                Value::Object(object)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_objects() {
        let value = from_json_str(r#"{"_key":"e1","n":3,"tags":["a"],"x":null}"#).unwrap();
        assert_eq!(value.get("_key"), Some(&Value::from("e1")));
        assert_eq!(value.get("n"), Some(&Value::Integer(3)));
        assert_eq!(value.get("x"), Some(&Value::Null));
    }

    #[test]
    fn rejects_fractions() {
        assert_eq!(from_json_str("1.25"), Err(CodecError::FloatForbidden));
    }

    #[test]
    fn rejects_huge_integers() {
        assert_eq!(
            from_json_str("18446744073709551615"),
            Err(CodecError::IntegerOverflow)
        );
    }

    #[test]
    fn renders_compact_json() {
        let value = Value::object([("a", Value::from(1)), ("b", Value::from("x"))]);
        assert_eq!(to_json_string(&value).unwrap(), r#"{"a":1,"b":"x"}"#);
    }

    #[test]
    fn malformed_json_is_a_decoding_error() {
        assert!(matches!(
            from_json_str("{"),
            Err(CodecError::DecodingFailed { .. })
        ));
    }
}
