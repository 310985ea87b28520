//! Documents, keys and key generation.

mod key;
mod keygen;

pub use key::{validate_collection_name, validate_key, MAX_COLLECTION_NAME_LENGTH, MAX_KEY_LENGTH};
pub use keygen::{KeyGenerator, TraditionalKeyGenerator, UuidKeyGenerator};

use crate::types::Revision;
use revstore_codec::Value;
use std::sync::Arc;

/// Attribute holding the document key.
pub const KEY_ATTRIBUTE: &str = "_key";
/// Attribute holding the document revision.
pub const REV_ATTRIBUTE: &str = "_rev";
/// Attribute holding `<collection>/<key>`.
pub const ID_ATTRIBUTE: &str = "_id";
/// Edge source attribute.
pub const FROM_ATTRIBUTE: &str = "_from";
/// Edge target attribute.
pub const TO_ATTRIBUTE: &str = "_to";

/// One version of a document.
///
/// Bodies are shared behind an `Arc`, so cloning a document is cheap and
/// snapshot readers never copy body data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    key: String,
    revision: Revision,
    body: Arc<Value>,
    deleted: bool,
}

impl Document {
    /// Creates a live document.
    pub fn new(key: impl Into<String>, revision: Revision, body: Value) -> Self {
        Self {
            key: key.into(),
            revision,
            body: Arc::new(body),
            deleted: false,
        }
    }

    /// Creates a tombstone.
    pub fn tombstone(key: impl Into<String>, revision: Revision) -> Self {
        Self {
            key: key.into(),
            revision,
            body: Arc::new(Value::Null),
            deleted: true,
        }
    }

    /// Returns the document key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the revision of this version.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Returns the stored body without system attributes.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Returns true for tombstones.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Renders the body with `_key`, `_id` and `_rev` filled in.
    pub fn to_value(&self, collection: &str) -> Value {
        let mut out = match self.body.as_ref() {
            Value::Object(map) => Value::Object(map.clone()),
            _ => Value::empty_object(),
        };
        out.insert(KEY_ATTRIBUTE, Value::from(self.key.as_str()));
        out.insert(ID_ATTRIBUTE, Value::Text(format!("{collection}/{}", self.key)));
        out.insert(REV_ATTRIBUTE, Value::Text(self.revision.to_token()));
        out
    }
}

/// Removes `_key`, `_id` and `_rev` from a body before storage.
///
/// Returns the `_key` attribute if it was present.
pub(crate) fn strip_system_attributes(body: &mut Value) -> Option<Value> {
    body.remove(ID_ATTRIBUTE);
    body.remove(REV_ATTRIBUTE);
    body.remove(KEY_ATTRIBUTE)
}

/// Returns true if `body` has string `_from` and `_to` attributes.
pub(crate) fn has_edge_endpoints(body: &Value) -> bool {
    body.get(FROM_ATTRIBUTE).and_then(Value::as_text).is_some()
        && body.get(TO_ATTRIBUTE).and_then(Value::as_text).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_value_adds_system_attributes() {
        let doc = Document::new("a", Revision::new(12), Value::object([("x", Value::from(1))]));
        let value = doc.to_value("users");
        assert_eq!(value.get("_key"), Some(&Value::from("a")));
        assert_eq!(value.get("_id"), Some(&Value::from("users/a")));
        assert_eq!(value.get("_rev"), Some(&Value::from("12")));
        assert_eq!(value.get("x"), Some(&Value::from(1)));
        assert_eq!(doc.body().get("_key"), None);
    }

    #[test]
    fn tombstones_are_deleted() {
        let doc = Document::tombstone("a", Revision::new(3));
        assert!(doc.is_deleted());
        assert!(doc.body().is_null());
    }

    #[test]
    fn strip_returns_key() {
        let mut body = Value::object([
            ("_key", Value::from("k")),
            ("_rev", Value::from("1")),
            ("_id", Value::from("c/k")),
            ("v", Value::from(true)),
        ]);
        assert_eq!(strip_system_attributes(&mut body), Some(Value::from("k")));
        assert_eq!(body, Value::object([("v", Value::from(true))]));
    }

    #[test]
    fn edge_endpoints() {
        let edge = Value::object([("_from", Value::from("v/1")), ("_to", Value::from("v/2"))]);
        assert!(has_edge_endpoints(&edge));
        let broken = Value::object([("_from", Value::from("v/1")), ("_to", Value::from(2))]);
        assert!(!has_edge_endpoints(&broken));
    }
}
