//! Field access helpers shared by the message decoders.

use revstore_codec::{from_cbor, CodecError, CodecResult, Object, Value};

/// Reinterprets a `u64` as a CBOR integer.
pub(crate) fn int(value: u64) -> Value {
    Value::Integer(value as i64)
}

/// Inverse of [`int`].
pub(crate) fn uint(value: &Value) -> Option<u64> {
    value.as_integer().map(|n| n as u64)
}

/// Named attributes of a decoded message map.
pub(crate) struct Fields<'a> {
    map: &'a Object,
}

impl<'a> Fields<'a> {
    pub(crate) fn of(value: &'a Value) -> CodecResult<Self> {
        value
            .as_object()
            .map(|map| Self { map })
            .ok_or_else(|| CodecError::invalid_structure("expected map"))
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name).filter(|v| !v.is_null())
    }

    pub(crate) fn required(&self, name: &str) -> CodecResult<&'a Value> {
        self.get(name)
            .ok_or_else(|| CodecError::invalid_structure(format!("missing {name}")))
    }

    pub(crate) fn u64(&self, name: &str) -> CodecResult<u64> {
        uint(self.required(name)?)
            .ok_or_else(|| CodecError::invalid_structure(format!("{name} must be an integer")))
    }

    pub(crate) fn opt_u64(&self, name: &str) -> CodecResult<Option<u64>> {
        self.get(name)
            .map(|v| {
                uint(v).ok_or_else(|| {
                    CodecError::invalid_structure(format!("{name} must be an integer"))
                })
            })
            .transpose()
    }

    pub(crate) fn text(&self, name: &str) -> CodecResult<&'a str> {
        self.required(name)?
            .as_text()
            .ok_or_else(|| CodecError::invalid_structure(format!("{name} must be text")))
    }

    pub(crate) fn array(&self, name: &str) -> CodecResult<&'a [Value]> {
        self.required(name)?
            .as_array()
            .ok_or_else(|| CodecError::invalid_structure(format!("{name} must be an array")))
    }
}

/// Decodes CBOR bytes and hands the top-level map to `f`.
pub(crate) fn decode_map<T>(
    bytes: &[u8],
    f: impl FnOnce(&Fields<'_>) -> CodecResult<T>,
) -> CodecResult<T> {
    let value = from_cbor(bytes)?;
    f(&Fields::of(&value)?)
}

/// Decodes an array of integers.
pub(crate) fn u64_list(name: &str, items: &[Value]) -> CodecResult<Vec<u64>> {
    items
        .iter()
        .map(|v| {
            uint(v).ok_or_else(|| {
                CodecError::invalid_structure(format!("{name} entries must be integers"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_the_full_u64_range() {
        for n in [0, 1, i64::MAX as u64, u64::MAX] {
            assert_eq!(uint(&int(n)), Some(n));
        }
    }

    #[test]
    fn null_fields_count_as_missing() {
        let value = Value::object([("a", Value::Null), ("b", Value::from(3))]);
        let fields = Fields::of(&value).unwrap();
        assert!(fields.required("a").is_err());
        assert_eq!(fields.opt_u64("a").unwrap(), None);
        assert_eq!(fields.u64("b").unwrap(), 3);
        assert!(fields.text("b").is_err());
    }

    #[test]
    fn non_maps_are_rejected() {
        assert!(Fields::of(&Value::from(1)).is_err());
    }
}
