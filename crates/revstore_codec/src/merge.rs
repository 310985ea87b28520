//! Merge-patch semantics for partial document updates.

use crate::value::{Object, Value};

/// Options controlling how a patch is merged into a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// When `true`, a `null` in the patch is stored as an explicit null.
    /// When `false`, it removes the attribute from the target.
    pub keep_null: bool,
    /// When `true`, nested objects are merged recursively. When `false`,
    /// a nested object in the patch replaces the stored one.
    pub merge_objects: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            keep_null: true,
            merge_objects: true,
        }
    }
}

impl MergeOptions {
    /// Sets the `keep_null` flag.
    #[must_use]
    pub const fn keep_null(mut self, value: bool) -> Self {
        self.keep_null = value;
        self
    }

    /// Sets the `merge_objects` flag.
    #[must_use]
    pub const fn merge_objects(mut self, value: bool) -> Self {
        self.merge_objects = value;
        self
    }
}

impl Value {
    /// Merges `patch` into this value.
    ///
    /// Both values are expected to be objects; if either is not, the patch
    /// replaces this value outright (after null stripping when
    /// `keep_null` is off).
    pub fn merge_patch(&mut self, patch: &Value, options: MergeOptions) {
        match (self.as_object_mut(), patch.as_object()) {
            (Some(target), Some(source)) => merge_into(target, source, options),
            _ => *self = prepared(patch, options),
        }
    }

    /// Returns a copy of this value with the patch merged in.
    #[must_use]
    pub fn merged(&self, patch: &Value, options: MergeOptions) -> Value {
        let mut out = self.clone();
        out.merge_patch(patch, options);
        out
    }

    /// Recursively removes attributes whose value is null.
    pub fn strip_nulls(&mut self) {
        match self {
            Value::Object(map) => {
                map.retain(|_, v| !v.is_null());
                for v in map.values_mut() {
                    v.strip_nulls();
                }
            }
            Value::Array(items) => {
                for item in items {
                    item.strip_nulls();
                }
            }
            _ => {}
        }
    }
}

fn merge_into(target: &mut Object, source: &Object, options: MergeOptions) {
    for (key, incoming) in source {
        if incoming.is_null() {
            if options.keep_null {
                target.insert(key.clone(), Value::Null);
            } else {
                target.remove(key);
            }
            continue;
        }

        if options.merge_objects {
            if let (Some(existing), Some(nested)) = (
                target.get_mut(key).and_then(Value::as_object_mut),
                incoming.as_object(),
            ) {
                merge_into(existing, nested, options);
                continue;
            }
        }

        target.insert(key.clone(), prepared(incoming, options));
    }
}

fn prepared(value: &Value, options: MergeOptions) -> Value {
    let mut out = value.clone();
    if !options.keep_null {
        // Only object attributes are dropped; array elements keep their nulls.
        strip_object_nulls(&mut out);
    }
    out
}

fn strip_object_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for v in map.values_mut() {
            strip_object_nulls(v);
        }
    }
}
