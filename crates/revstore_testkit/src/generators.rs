//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use revstore_core::{CoreError, CoreResult, Database, Value};

/// Strategy for generating valid document keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_:.@-]{1,24}").expect("Invalid regex")
}

/// Strategy for keys drawn from a small pool, so generated operations
/// collide on the same documents.
pub fn pooled_key_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("k{i}"))
}

/// Strategy for valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_-]{0,31}").expect("Invalid regex")
}

fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-z ]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for nested attribute values (depth at most 3).
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

/// Strategy for document bodies: objects without system attributes.
pub fn body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,8}", value_strategy(), 0..6).prop_map(Value::Object)
}

/// A single-document operation.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Create or replace a document
    Put {
        /// Document key
        key: String,
        /// Document body
        body: Value,
    },
    /// Remove a document
    Remove {
        /// Document key
        key: String,
    },
    /// Read a document
    Get {
        /// Document key
        key: String,
    },
}

impl Operation {
    /// Key the operation targets.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Remove { key } | Self::Get { key } => key,
        }
    }

    /// Applies the operation to `collection`.
    ///
    /// Removing or reading a missing document is not an error.
    ///
    /// # Errors
    ///
    /// Propagates every other failure.
    pub fn apply(&self, db: &Database, collection: &str) -> CoreResult<()> {
        let result = match self {
            Self::Put { key, body } => db.put(collection, key, body.clone(), None).map(drop),
            Self::Remove { key } => db.remove(collection, key, None).map(drop),
            Self::Get { key } => db.get(collection, key).map(drop),
        };
        match result {
            Err(CoreError::DocumentNotFound { .. }) => Ok(()),
            other => other,
        }
    }
}

/// Strategy for operations on keys from a pool of `pool` keys.
pub fn operation_strategy(pool: usize) -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (pooled_key_strategy(pool), body_strategy())
            .prop_map(|(key, body)| Operation::Put { key, body }),
        1 => pooled_key_strategy(pool).prop_map(|key| Operation::Remove { key }),
        2 => pooled_key_strategy(pool).prop_map(|key| Operation::Get { key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(pool), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
