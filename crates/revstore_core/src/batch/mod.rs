//! Batch mutation coordinator.
//!
//! A batch applies one operation to an ordered list of items. Every item
//! gets its own outcome; a failing item never blocks its siblings. Only a
//! malformed call (missing bodies, mismatched lengths) fails the batch as a
//! whole, and it does so before anything is written.
//!
//! Outputs are aligned with inputs: `results[i]` belongs to item `i` no
//! matter which worker thread processed it.

mod executor;
mod import;

pub(crate) use executor::Executor;
pub use import::{DuplicatePolicy, ImportOptions, ImportStats};

use crate::collection::{meta_of, Collection, DocumentMeta, OverwriteMode, WriteKind};
use crate::document::{validate_key, Document};
use crate::error::{CoreError, CoreResult};
use crate::ledger::MutationOutcome;
use crate::types::Revision;
use revstore_codec::{MergeOptions, Value};
use tracing::debug;

/// Revision precondition of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Precondition {
    /// No revision check.
    #[default]
    None,
    /// Every item must currently be at this revision.
    Shared(Revision),
    /// One optional expected revision per item.
    PerItem(Vec<Option<Revision>>),
}

impl Precondition {
    fn expected_for(&self, index: usize) -> Option<Revision> {
        match self {
            Self::None => None,
            Self::Shared(revision) => Some(*revision),
            Self::PerItem(revisions) => revisions.get(index).copied().flatten(),
        }
    }

    fn validate(&self, items: usize) -> CoreResult<()> {
        match self {
            Self::PerItem(revisions) if revisions.len() != items => {
                Err(CoreError::invalid_argument(format!(
                    "expected {items} revisions, got {}",
                    revisions.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Modifiers applied uniformly to every item of a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Return the body before the mutation.
    pub return_old: bool,
    /// Return the body after the mutation.
    pub return_new: bool,
    /// Update only: store nulls instead of removing attributes.
    pub keep_null: bool,
    /// Update only: merge nested objects instead of replacing them.
    pub merge_objects: bool,
    /// Suppress per-item output.
    pub silent: bool,
    /// Wait for durability; `None` uses the collection default.
    pub wait_for_sync: Option<bool>,
    /// Revision precondition.
    pub precondition: Precondition,
    /// Create only: what to do with existing keys.
    pub overwrite_mode: OverwriteMode,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            return_old: false,
            return_new: false,
            keep_null: true,
            merge_objects: true,
            silent: false,
            wait_for_sync: None,
            precondition: Precondition::None,
            overwrite_mode: OverwriteMode::Conflict,
        }
    }
}

impl BatchOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `return_old`.
    #[must_use]
    pub const fn return_old(mut self, value: bool) -> Self {
        self.return_old = value;
        self
    }

    /// Sets `return_new`.
    #[must_use]
    pub const fn return_new(mut self, value: bool) -> Self {
        self.return_new = value;
        self
    }

    /// Sets `keep_null`.
    #[must_use]
    pub const fn keep_null(mut self, value: bool) -> Self {
        self.keep_null = value;
        self
    }

    /// Sets `merge_objects`.
    #[must_use]
    pub const fn merge_objects(mut self, value: bool) -> Self {
        self.merge_objects = value;
        self
    }

    /// Sets `silent`.
    #[must_use]
    pub const fn silent(mut self, value: bool) -> Self {
        self.silent = value;
        self
    }

    /// Sets `wait_for_sync`.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = Some(value);
        self
    }

    /// Sets the revision precondition.
    #[must_use]
    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    /// Sets the overwrite mode for creates.
    #[must_use]
    pub const fn overwrite_mode(mut self, mode: OverwriteMode) -> Self {
        self.overwrite_mode = mode;
        self
    }

    fn merge_options(&self) -> MergeOptions {
        MergeOptions::default()
            .keep_null(self.keep_null)
            .merge_objects(self.merge_objects)
    }
}

/// Per-item outcomes of a batch, aligned with the input.
///
/// All vectors are empty for silent batches. `old` and `new` are only
/// filled when requested, and `documents` only by reads.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Outcome of each item.
    pub results: Vec<CoreResult<DocumentMeta>>,
    /// Body before the mutation, for successfully mutated items.
    pub old: Vec<Option<Value>>,
    /// Body after the mutation, for successfully mutated items.
    pub new: Vec<Option<Value>>,
    /// Documents returned by a read batch.
    pub documents: Vec<Option<Value>>,
}

impl BatchResult {
    /// Number of item outcomes.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if there are no item outcomes.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Successful metadata per item, `None` where the item failed.
    pub fn metas(&self) -> Vec<Option<&DocumentMeta>> {
        self.results.iter().map(|r| r.as_ref().ok()).collect()
    }

    /// Error per item, `None` where the item succeeded.
    pub fn errors(&self) -> Vec<Option<&CoreError>> {
        self.results.iter().map(|r| r.as_ref().err()).collect()
    }

    /// Number of failed items.
    pub fn error_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_err()).count()
    }
}

fn check_lengths(keys: usize, values: usize) -> CoreResult<()> {
    if keys != values {
        return Err(CoreError::invalid_argument(format!(
            "got {keys} keys but {values} bodies"
        )));
    }
    Ok(())
}

impl Collection {
    /// Creates one document per body.
    ///
    /// Keys come from `keys` when given, else from `_key` in each body,
    /// else from the key generator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `bodies` is missing or the lengths of
    /// `keys`, `bodies` and per-item revisions differ, and `Durability` if
    /// a requested sync fails. Item failures are reported in the result.
    pub fn create_many(
        &self,
        keys: Option<&[String]>,
        bodies: Option<&[Value]>,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        let bodies = bodies.ok_or_else(|| CoreError::invalid_argument("bodies are required"))?;
        if let Some(keys) = keys {
            check_lengths(keys.len(), bodies.len())?;
        }
        options.precondition.validate(bodies.len())?;

        let mut item_keys = Vec::with_capacity(bodies.len());
        let mut prepared = Vec::with_capacity(bodies.len());
        for (i, body) in bodies.iter().enumerate() {
            let explicit = keys.map(|k| k[i].as_str());
            match (
                self.resolve_key(explicit, body),
                self.prepare_body(body.clone()),
            ) {
                (Ok(key), Ok(body)) => {
                    item_keys.push(Ok(key));
                    prepared.push(Some(body));
                }
                (Err(e), _) | (_, Err(e)) => {
                    item_keys.push(Err(e));
                    prepared.push(None);
                }
            }
        }

        let kind = WriteKind::Create(options.overwrite_mode, options.merge_options());
        self.run_writes("create", item_keys, &prepared, kind, options)
    }

    /// Reads the documents stored under `keys`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if per-item revisions do not match the
    /// number of keys.
    pub fn read_many(&self, keys: &[String], options: &BatchOptions) -> CoreResult<BatchResult> {
        options.precondition.validate(keys.len())?;
        let item_keys: Vec<CoreResult<String>> = keys
            .iter()
            .map(|k| validate_key(k).map(|()| k.clone()))
            .collect();

        let outcomes = self.executor().run(&item_keys, |i, key| {
            let doc = self.get(key)?;
            match options.precondition.expected_for(i) {
                Some(expected) if expected != doc.revision() => {
                    self.stats_handle().record_precondition_failure();
                    Err(CoreError::precondition_failed(
                        key,
                        expected,
                        Some(doc.revision()),
                    ))
                }
                _ => Ok(doc),
            }
        });

        if options.silent {
            return Ok(BatchResult::default());
        }

        let mut result = BatchResult::default();
        for outcome in outcomes {
            match outcome {
                Ok(doc) => {
                    result.results.push(Ok(DocumentMeta {
                        key: doc.key().to_string(),
                        revision: doc.revision(),
                        old_revision: None,
                    }));
                    result.documents.push(Some(doc.to_value(self.name())));
                }
                Err(e) => {
                    result.results.push(Err(e));
                    result.documents.push(None);
                }
            }
        }
        Ok(result)
    }

    /// Merges one patch into each existing document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `updates` is missing or lengths differ,
    /// and `Durability` if a requested sync fails.
    pub fn update_many(
        &self,
        keys: &[String],
        updates: Option<&[Value]>,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        let updates =
            updates.ok_or_else(|| CoreError::invalid_argument("updates are required"))?;
        let kind = WriteKind::Update(options.merge_options());
        self.keyed_writes("update", keys, Some(updates), kind, options)
    }

    /// Replaces each existing document with a new body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `bodies` is missing or lengths differ,
    /// and `Durability` if a requested sync fails.
    pub fn replace_many(
        &self,
        keys: &[String],
        bodies: Option<&[Value]>,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        let bodies = bodies.ok_or_else(|| CoreError::invalid_argument("bodies are required"))?;
        self.keyed_writes("replace", keys, Some(bodies), WriteKind::Replace, options)
    }

    /// Tombstones the documents stored under `keys`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if per-item revisions do not match the
    /// number of keys, and `Durability` if a requested sync fails.
    pub fn remove_many(&self, keys: &[String], options: &BatchOptions) -> CoreResult<BatchResult> {
        self.keyed_writes("remove", keys, None, WriteKind::Remove, options)
    }

    fn keyed_writes(
        &self,
        op: &'static str,
        keys: &[String],
        bodies: Option<&[Value]>,
        kind: WriteKind,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        if let Some(bodies) = bodies {
            check_lengths(keys.len(), bodies.len())?;
        }
        options.precondition.validate(keys.len())?;

        let mut item_keys = Vec::with_capacity(keys.len());
        let mut prepared = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let body = bodies.map(|b| self.prepare_body(b[i].clone())).transpose();
            match (validate_key(key), body) {
                (Ok(()), Ok(body)) => {
                    item_keys.push(Ok(key.clone()));
                    prepared.push(body);
                }
                (Err(e), _) | (_, Err(e)) => {
                    item_keys.push(Err(e));
                    prepared.push(None);
                }
            }
        }
        self.run_writes(op, item_keys, &prepared, kind, options)
    }

    fn run_writes(
        &self,
        op: &'static str,
        keys: Vec<CoreResult<String>>,
        bodies: &[Option<Value>],
        kind: WriteKind,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        let outcomes = self.executor().run(&keys, |i, key| {
            self.write(
                key,
                kind,
                bodies[i].as_ref(),
                options.precondition.expected_for(i),
            )
        });

        let newest = outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok())
            .filter_map(|o| o.new.as_ref().map(Document::revision))
            .max();
        self.sync_if_requested(options.wait_for_sync, newest)?;

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        debug!(
            collection = %self.name(),
            op,
            items = outcomes.len(),
            failed,
            "batch applied"
        );

        if options.silent {
            return Ok(BatchResult::default());
        }
        Ok(self.assemble(&keys, outcomes, options))
    }

    fn assemble(
        &self,
        keys: &[CoreResult<String>],
        outcomes: Vec<CoreResult<MutationOutcome>>,
        options: &BatchOptions,
    ) -> BatchResult {
        let render = |doc: Option<&Document>| {
            doc.filter(|d| !d.is_deleted())
                .map(|d| d.to_value(self.name()))
        };

        let mut result = BatchResult::default();
        for (key, outcome) in keys.iter().zip(outcomes) {
            let (meta, old, new) = match (key, outcome) {
                (Ok(key), Ok(outcome)) => {
                    let old = outcome.new.as_ref().and(render(outcome.old.as_ref()));
                    let new = render(outcome.new.as_ref());
                    (meta_of(key, &outcome), old, new)
                }
                (Err(e), _) => (Err(e.clone()), None, None),
                (_, Err(e)) => (Err(e), None, None),
            };
            result.results.push(meta);
            if options.return_old {
                result.old.push(old);
            }
            if options.return_new {
                result.new.push(new);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectionOptions, Config};
    use crate::durability::{Durability, NoopDurability};
    use crate::ErrorKind;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn collection_with(config: Config, durability: Arc<dyn Durability>) -> Collection {
        Collection::new("docs", CollectionOptions::new(), Arc::new(config), durability)
    }

    fn collection() -> Collection {
        collection_with(Config::default(), Arc::new(NoopDurability))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn body(n: i64) -> Value {
        Value::object([("n", Value::from(n))])
    }

    #[test]
    fn missing_bodies_fail_the_batch() {
        let docs = collection();
        let err = docs
            .create_many(None, None, &BatchOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = docs
            .update_many(&keys(&["a"]), None, &BatchOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn length_mismatch_writes_nothing() {
        let docs = collection();
        let err = docs
            .create_many(
                Some(&keys(&["a", "b"])),
                Some(&[body(1)]),
                &BatchOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(docs.is_empty());
    }

    #[test]
    fn per_item_precondition_length_is_checked() {
        let docs = collection();
        let options = BatchOptions::new().precondition(Precondition::PerItem(vec![None]));
        let err = docs.remove_many(&keys(&["a", "b"]), &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn item_failures_do_not_block_siblings() {
        let docs = collection();
        docs.put("b", body(0), None).unwrap();

        let result = docs
            .create_many(
                Some(&keys(&["a", "b", "", "c"])),
                Some(&[body(1), body(2), body(3), Value::from(4)]),
                &BatchOptions::default(),
            )
            .unwrap();

        assert_eq!(result.len(), 4);
        assert!(result.results[0].is_ok());
        assert_eq!(
            result.results[1].as_ref().unwrap_err().kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            result.results[2].as_ref().unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            result.results[3].as_ref().unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(result.metas()[0].unwrap().key, "a");
        assert!(result.errors()[0].is_none());
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn generated_keys_are_returned() {
        let docs = collection();
        let result = docs
            .create_many(None, Some(&[body(1), body(2)]), &BatchOptions::default())
            .unwrap();
        let created: Vec<String> = result
            .metas()
            .into_iter()
            .map(|m| m.unwrap().key.clone())
            .collect();
        assert_eq!(created, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn shared_precondition_applies_per_item() {
        let docs = collection();
        let a = docs.put("a", body(1), None).unwrap();
        docs.put("b", body(1), None).unwrap();

        let options = BatchOptions::new().precondition(Precondition::Shared(a.revision));
        let result = docs
            .update_many(&keys(&["a", "b"]), Some(&[body(2), body(2)]), &options)
            .unwrap();
        assert!(result.results[0].is_ok());
        assert_eq!(
            result.results[1].as_ref().unwrap_err().kind(),
            ErrorKind::PreconditionFailed
        );
        assert_eq!(docs.get("b").unwrap().body(), &body(1));
    }

    #[test]
    fn keep_null_controls_null_attributes() {
        let docs = collection();
        docs.put("a", Value::object([("x", Value::from(1)), ("y", Value::from(2))]), None)
            .unwrap();
        docs.put("b", Value::object([("x", Value::from(1)), ("y", Value::from(2))]), None)
            .unwrap();
        let patch = Value::object([("y", Value::Null)]);

        docs.update_many(
            &keys(&["a"]),
            Some(&[patch.clone()]),
            &BatchOptions::new().keep_null(true),
        )
        .unwrap();
        docs.update_many(
            &keys(&["b"]),
            Some(&[patch]),
            &BatchOptions::new().keep_null(false),
        )
        .unwrap();

        assert_eq!(docs.get("a").unwrap().body().get("y"), Some(&Value::Null));
        assert_eq!(docs.get("b").unwrap().body().get("y"), None);
    }

    #[test]
    fn return_old_and_new() {
        let docs = collection();
        docs.put("a", body(1), None).unwrap();
        let options = BatchOptions::new().return_old(true).return_new(true);
        let result = docs
            .replace_many(&keys(&["a", "missing"]), Some(&[body(2), body(3)]), &options)
            .unwrap();

        assert_eq!(result.old[0].as_ref().unwrap().get("n"), Some(&Value::from(1)));
        assert_eq!(result.new[0].as_ref().unwrap().get("n"), Some(&Value::from(2)));
        assert_eq!(result.old[1], None);
        assert_eq!(result.new[1], None);
    }

    #[test]
    fn silent_returns_nothing_but_writes() {
        let docs = collection();
        let result = docs
            .create_many(
                Some(&keys(&["a", "b"])),
                Some(&[body(1), body(2)]),
                &BatchOptions::new().silent(true),
            )
            .unwrap();
        assert!(result.is_empty());
        assert!(result.errors().is_empty());
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn overwrite_modes() {
        let docs = collection();
        docs.put("a", body(1), None).unwrap();
        let patch = Value::object([("m", Value::from(true))]);

        let ignore = BatchOptions::new().overwrite_mode(OverwriteMode::Ignore);
        let result = docs
            .create_many(Some(&keys(&["a"])), Some(&[patch.clone()]), &ignore)
            .unwrap();
        assert!(result.results[0].is_ok());
        assert_eq!(docs.get("a").unwrap().body(), &body(1));

        let update = BatchOptions::new().overwrite_mode(OverwriteMode::Update);
        docs.create_many(Some(&keys(&["a"])), Some(&[patch.clone()]), &update)
            .unwrap();
        assert_eq!(docs.get("a").unwrap().body().get("n"), Some(&Value::from(1)));
        assert_eq!(docs.get("a").unwrap().body().get("m"), Some(&Value::from(true)));

        let replace = BatchOptions::new().overwrite_mode(OverwriteMode::Replace);
        docs.create_many(Some(&keys(&["a"])), Some(&[patch.clone()]), &replace)
            .unwrap();
        assert_eq!(docs.get("a").unwrap().body(), &patch);
    }

    #[test]
    fn reads_return_documents() {
        let docs = collection();
        docs.put("a", body(1), None).unwrap();
        let result = docs
            .read_many(&keys(&["a", "zz"]), &BatchOptions::default())
            .unwrap();
        assert_eq!(
            result.documents[0].as_ref().unwrap().get("_key"),
            Some(&Value::from("a"))
        );
        assert!(result.results[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(result.documents[1], None);
    }

    #[derive(Debug, Default)]
    struct Recording(Mutex<Vec<Revision>>);

    impl Durability for Recording {
        fn sync(&self, _collection: &str, revision: Revision) -> CoreResult<()> {
            self.0.lock().push(revision);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl Durability for Failing {
        fn sync(&self, _collection: &str, _revision: Revision) -> CoreResult<()> {
            Err(CoreError::durability("disk gone"))
        }
    }

    #[test]
    fn wait_for_sync_flushes_once_per_batch() {
        let recording = Arc::new(Recording::default());
        let docs = collection_with(Config::default(), recording.clone());
        let result = docs
            .create_many(
                Some(&keys(&["a", "b"])),
                Some(&[body(1), body(2)]),
                &BatchOptions::new().wait_for_sync(true),
            )
            .unwrap();
        let newest = result.metas().iter().map(|m| m.unwrap().revision).max();
        assert_eq!(recording.0.lock().clone(), vec![newest.unwrap()]);

        docs.create_many(Some(&keys(&["c"])), Some(&[body(3)]), &BatchOptions::default())
            .unwrap();
        assert_eq!(recording.0.lock().len(), 1);
    }

    #[test]
    fn failed_sync_is_a_batch_error() {
        let docs = collection_with(Config::default(), Arc::new(Failing));
        let err = docs
            .create_many(
                Some(&keys(&["a"])),
                Some(&[body(1)]),
                &BatchOptions::new().wait_for_sync(true),
            )
            .unwrap_err();
        assert_eq!(err, CoreError::durability("disk gone"));
    }

    #[test]
    fn parallel_batches_keep_order() {
        let config = Config::default()
            .batch_parallelism(4)
            .parallel_batch_threshold(2);
        let docs = collection_with(config, Arc::new(NoopDurability));
        let names: Vec<String> = (0..300).map(|i| format!("k{i}")).collect();
        let bodies: Vec<Value> = (0..300).map(body).collect();

        let result = docs
            .create_many(Some(&names), Some(&bodies), &BatchOptions::default())
            .unwrap();
        for (name, meta) in names.iter().zip(result.metas()) {
            assert_eq!(&meta.unwrap().key, name);
        }

        let removed = docs.remove_many(&names, &BatchOptions::default()).unwrap();
        assert_eq!(removed.error_count(), 0);
        assert!(docs.is_empty());
    }
}
