//! Durability hooks for tests.

use parking_lot::Mutex;
use revstore_core::{CoreError, CoreResult, Durability, Revision};

/// Durability that records every flush request.
#[derive(Debug, Default)]
pub struct RecordingDurability {
    calls: Mutex<Vec<(String, Revision)>>,
}

impl RecordingDurability {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded `(collection, revision)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, Revision)> {
        self.calls.lock().clone()
    }

    /// Number of flushes requested so far.
    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Durability for RecordingDurability {
    fn sync(&self, collection: &str, revision: Revision) -> CoreResult<()> {
        self.calls.lock().push((collection.to_string(), revision));
        Ok(())
    }
}

/// Durability whose flushes always fail.
#[derive(Debug, Clone)]
pub struct FailingDurability {
    message: String,
}

impl FailingDurability {
    /// Creates a hook failing with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingDurability {
    fn default() -> Self {
        Self::new("disk full")
    }
}

impl Durability for FailingDurability {
    fn sync(&self, _collection: &str, _revision: Revision) -> CoreResult<()> {
        Err(CoreError::durability(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;
    use revstore_core::{BatchOptions, Config, ErrorKind, Value};
    use std::sync::Arc;

    #[test]
    fn wait_for_sync_flushes_once_per_batch() {
        let recorder = Arc::new(RecordingDurability::new());
        let test_db = TestDatabase::with_durability(Config::default(), recorder.clone());
        test_db.create("docs");

        let bodies = vec![Value::empty_object(); 3];
        test_db
            .create_many(
                "docs",
                None,
                Some(bodies.as_slice()),
                &BatchOptions::default().wait_for_sync(true),
            )
            .unwrap();
        test_db.put("docs", "plain", Value::empty_object(), None).unwrap();

        let calls = recorder.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "docs");
    }

    #[test]
    fn failing_flush_surfaces_as_internal_error() {
        let test_db = TestDatabase::with_durability(
            Config::default().wait_for_sync(true),
            Arc::new(FailingDurability::default()),
        );
        test_db.create("docs");
        let err = test_db
            .put("docs", "a", Value::empty_object(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
