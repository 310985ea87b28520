//! Deterministic CBOR encoding and decoding.
//!
//! Encoding walks the value through serde into ciborium. Objects are
//! `BTreeMap`s, so attributes are always emitted in key order and equal
//! values produce equal bytes. Decoding goes through `ciborium::Value` and
//! rejects anything outside the document model (floats, tags, non-text
//! object keys).

use crate::error::{CodecError, CodecResult};
use crate::value::{Object, Value};
use ciborium::value::Value as Cbor;

/// Maximum nesting depth accepted when decoding.
const MAX_DEPTH: usize = 128;

/// Encode a value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if the underlying writer fails.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or contain constructs
/// outside the document model.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let raw: Cbor = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    convert(raw, 0)
}

fn convert(raw: Cbor, depth: usize) -> CodecResult<Value> {
    if depth > MAX_DEPTH {
        return Err(CodecError::invalid_structure("nesting too deep"));
    }

    match raw {
        Cbor::Null => Ok(Value::Null),
        Cbor::Bool(b) => Ok(Value::Bool(b)),
        Cbor::Integer(n) => i64::try_from(i128::from(n))
            .map(Value::Integer)
            .map_err(|_| CodecError::IntegerOverflow),
        Cbor::Float(_) => Err(CodecError::FloatForbidden),
        Cbor::Text(s) => Ok(Value::Text(s)),
        Cbor::Bytes(b) => Ok(Value::Bytes(b)),
        Cbor::Array(items) => items
            .into_iter()
            .map(|item| convert(item, depth + 1))
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        Cbor::Map(pairs) => {
            let mut object = Object::new();
            for (k, v) in pairs {
                let key = match k {
                    Cbor::Text(s) => s,
                    other => {
                        return Err(CodecError::NonTextKey {
                            found: cbor_kind(&other).to_string(),
                        })
                    }
                };
                object.insert(key, convert(v, depth + 1)?);
            }
            Ok(Value::Object(object))
        }
        Cbor::Tag(tag, _) => Err(CodecError::unsupported_type(format!("tag {tag}"))),
        other => Err(CodecError::unsupported_type(cbor_kind(&other))),
    }
}

fn cbor_kind(value: &Cbor) -> &'static str {
    match value {
        Cbor::Null => "null",
        Cbor::Bool(_) => "bool",
        Cbor::Integer(_) => "integer",
        Cbor::Float(_) => "float",
        Cbor::Text(_) => "text",
        Cbor::Bytes(_) => "bytes",
        Cbor::Array(_) => "array",
        Cbor::Map(_) => "map",
        Cbor::Tag(..) => "tag",
        _ => "unknown",
    }
}
