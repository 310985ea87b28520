//! Collection handle.
//!
//! A [`Collection`] owns one ledger and everything needed to mutate it:
//! key generation, the durability hook and statistics. Single-document
//! operations live here; batch and import operations are in
//! [`crate::batch`].

use crate::batch::Executor;
use crate::config::{CollectionKind, CollectionOptions, Config, KeyGeneratorKind};
use crate::document::{
    has_edge_endpoints, strip_system_attributes, validate_key, Document, KeyGenerator,
    TraditionalKeyGenerator, UuidKeyGenerator,
};
use crate::durability::Durability;
use crate::error::{CoreError, CoreResult};
use crate::ledger::{live, CompactionResult, Ledger, Mutation, MutationOutcome};
use crate::stats::{LedgerStats, StatsSnapshot};
use crate::types::Revision;
use revstore_codec::{MergeOptions, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Key and revision of a document after a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMeta {
    /// Document key.
    pub key: String,
    /// Revision after the operation.
    pub revision: Revision,
    /// Live revision before the operation, if there was one.
    pub old_revision: Option<Revision>,
}

/// Behaviour of create when the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwriteMode {
    /// Fail the item with `Conflict`.
    #[default]
    Conflict,
    /// Replace the existing document.
    Replace,
    /// Merge the new body into the existing document.
    Update,
    /// Keep the existing document and report it.
    Ignore,
}

/// A write applied to one key.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteKind {
    /// Insert; existing keys are handled per overwrite mode.
    Create(OverwriteMode, MergeOptions),
    /// Insert or replace.
    Put,
    /// Replace an existing document.
    Replace,
    /// Merge into an existing document.
    Update(MergeOptions),
    /// Tombstone an existing document.
    Remove,
}

/// A collection of documents.
#[derive(Debug)]
pub struct Collection {
    name: String,
    options: CollectionOptions,
    config: Arc<Config>,
    ledger: Arc<Ledger>,
    keys: Box<dyn KeyGenerator>,
    durability: Arc<dyn Durability>,
    stats: Arc<LedgerStats>,
    mutations: AtomicU64,
}

impl Collection {
    pub(crate) fn new(
        name: impl Into<String>,
        options: CollectionOptions,
        config: Arc<Config>,
        durability: Arc<dyn Durability>,
    ) -> Self {
        let keys: Box<dyn KeyGenerator> = match config.key_generator {
            KeyGeneratorKind::Traditional => Box::new(TraditionalKeyGenerator::new()),
            KeyGeneratorKind::Uuid => Box::new(UuidKeyGenerator),
        };
        Self {
            name: name.into(),
            options,
            ledger: Arc::new(Ledger::new(config.shard_count)),
            config,
            keys,
            durability,
            stats: Arc::new(LedgerStats::new()),
            mutations: AtomicU64::new(0),
        }
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the collection options.
    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Returns true for edge collections.
    pub fn is_edge(&self) -> bool {
        self.options.kind == CollectionKind::Edge
    }

    /// Returns a copy of the statistics counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.ledger.live_count()
    }

    /// Returns true if no live document exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest revision minted or accepted by this collection.
    pub fn high_water_revision(&self) -> Revision {
        self.ledger.high_water_revision()
    }

    pub(crate) fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub(crate) fn stats_handle(&self) -> &LedgerStats {
        &self.stats
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn executor(&self) -> Executor {
        Executor::new(
            self.config.batch_parallelism,
            self.config.parallel_batch_threshold,
        )
    }

    /// Reads the live document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key and `DocumentNotFound`
    /// if the key has no live document.
    pub fn get(&self, key: &str) -> CoreResult<Document> {
        validate_key(key)?;
        self.stats.record_read();
        self.ledger
            .get(key)
            .ok_or_else(|| CoreError::document_not_found(key))
    }

    /// Stores `body` under `key`, creating or replacing the document.
    ///
    /// With `expected` set, the write only happens if the current live
    /// revision equals it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key or body and
    /// `PreconditionFailed` if `expected` does not match.
    pub fn put(
        &self,
        key: &str,
        body: Value,
        expected: Option<Revision>,
    ) -> CoreResult<DocumentMeta> {
        validate_key(key)?;
        let body = self.prepare_body(body)?;
        let outcome = self.write(key, WriteKind::Put, Some(&body), expected)?;
        self.sync_if_requested(None, outcome.new.as_ref().map(Document::revision))?;
        meta_of(key, &outcome)
    }

    /// Tombstones the document under `key`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key, `DocumentNotFound` if
    /// the key has no live document and `PreconditionFailed` if `expected`
    /// does not match.
    pub fn remove(&self, key: &str, expected: Option<Revision>) -> CoreResult<DocumentMeta> {
        validate_key(key)?;
        let outcome = self.write(key, WriteKind::Remove, None, expected)?;
        self.sync_if_requested(None, outcome.new.as_ref().map(Document::revision))?;
        meta_of(key, &outcome)
    }

    /// Stores a document version minted by another replica.
    ///
    /// The version is applied only if it is newer than everything stored
    /// locally for the key. Returns whether it was applied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key or non-object body.
    pub fn apply_replicated(&self, doc: Document) -> CoreResult<bool> {
        validate_key(doc.key())?;
        if !doc.is_deleted() && !doc.body().is_object() {
            return Err(CoreError::invalid_argument("document body must be an object"));
        }
        let revision = doc.revision();
        let key = doc.key().to_string();
        let outcome = self.ledger.mutate(&key, |latest| {
            Ok(match latest {
                Some(current) if current.revision() >= revision => Mutation::Skip,
                _ => Mutation::Replicate(doc),
            })
        })?;
        let applied = outcome.new.is_some();
        if applied {
            self.stats.record_write();
            self.after_mutation(1);
        }
        trace!(collection = %self.name, key = %key, %revision, applied, "replicated document");
        Ok(applied)
    }

    /// Tombstones `key` with a revision minted by another replica.
    ///
    /// Returns whether the removal was applied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key.
    pub fn apply_replicated_removal(&self, key: &str, revision: Revision) -> CoreResult<bool> {
        self.apply_replicated(Document::tombstone(key, revision))
    }

    /// Tombstones every live document. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Propagates ledger failures.
    pub fn truncate(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for key in self.ledger.live_keys() {
            let outcome = self.ledger.mutate(&key, |latest| {
                Ok(if live(latest).is_some() {
                    Mutation::Remove
                } else {
                    Mutation::Skip
                })
            })?;
            if outcome.new.is_some() {
                self.stats.record_remove();
                removed += 1;
            }
        }
        self.after_mutation(removed as u64);
        debug!(collection = %self.name, removed, "truncated collection");
        Ok(removed)
    }

    /// Drops versions and tombstones no reader can observe any more.
    pub fn compact(&self) -> CompactionResult {
        self.stats.record_compaction();
        self.mutations.store(0, Ordering::Relaxed);
        self.ledger.compact()
    }

    /// Resolves the key of a created document.
    ///
    /// Preference: explicit key, then `_key` in the body, then a generated
    /// key.
    pub(crate) fn resolve_key(&self, explicit: Option<&str>, body: &Value) -> CoreResult<String> {
        let key = match (explicit, body.get(crate::document::KEY_ATTRIBUTE)) {
            (Some(key), _) => key.to_string(),
            (None, Some(Value::Text(key))) => key.clone(),
            (None, Some(_)) => {
                return Err(CoreError::invalid_argument("_key attribute must be a string"))
            }
            (None, None) => return Ok(self.keys.generate()),
        };
        validate_key(&key)?;
        self.keys.track(&key);
        Ok(key)
    }

    /// Checks that `body` is an object and strips system attributes.
    pub(crate) fn prepare_body(&self, body: Value) -> CoreResult<Value> {
        if !body.is_object() {
            return Err(CoreError::invalid_argument(format!(
                "document body must be an object, got {}",
                body.kind_name()
            )));
        }
        let mut body = body;
        strip_system_attributes(&mut body);
        Ok(body)
    }

    /// Applies one write to `key` and records its statistics.
    ///
    /// `body` must already be prepared; it is required for every kind
    /// except [`WriteKind::Remove`].
    pub(crate) fn write(
        &self,
        key: &str,
        kind: WriteKind,
        body: Option<&Value>,
        expected: Option<Revision>,
    ) -> CoreResult<MutationOutcome> {
        let edge = self.is_edge();
        let result = self.ledger.mutate(key, |latest| {
            decide(key, kind, body, expected, live(latest), edge)
        });

        match &result {
            Ok(outcome) => match &outcome.new {
                Some(doc) if doc.is_deleted() => {
                    self.stats.record_remove();
                    self.after_mutation(1);
                }
                Some(_) => {
                    self.stats.record_write();
                    self.after_mutation(1);
                }
                None => {}
            },
            Err(CoreError::PreconditionFailed { .. }) => self.stats.record_precondition_failure(),
            Err(CoreError::Conflict { .. }) => self.stats.record_conflict(),
            Err(_) => {}
        }
        result
    }

    /// Invokes the durability hook if `wait_for_sync` resolves to true.
    pub(crate) fn sync_if_requested(
        &self,
        requested: Option<bool>,
        revision: Option<Revision>,
    ) -> CoreResult<()> {
        let wait = requested
            .or(self.options.wait_for_sync)
            .unwrap_or(self.config.wait_for_sync);
        match revision {
            Some(revision) if wait => self.durability.sync(&self.name, revision),
            _ => Ok(()),
        }
    }

    fn after_mutation(&self, count: u64) {
        let interval = self.config.auto_compact_interval;
        if interval == 0 || count == 0 {
            return;
        }
        let total = self.mutations.fetch_add(count, Ordering::Relaxed) + count;
        if total >= interval {
            let result = self.compact();
            debug!(collection = %self.name, ?result, "auto compaction");
        }
    }
}

fn check_precondition(
    key: &str,
    expected: Option<Revision>,
    current: &Document,
) -> CoreResult<()> {
    match expected {
        Some(expected) if expected != current.revision() => Err(CoreError::precondition_failed(
            key,
            expected,
            Some(current.revision()),
        )),
        _ => Ok(()),
    }
}

fn require_body(body: Option<&Value>) -> CoreResult<&Value> {
    body.ok_or_else(|| CoreError::invalid_argument("document body is required"))
}

fn checked_edge(body: Value, edge: bool) -> CoreResult<Mutation> {
    if edge && !has_edge_endpoints(&body) {
        return Err(CoreError::invalid_argument(
            "edge documents need string _from and _to attributes",
        ));
    }
    Ok(Mutation::Write(body))
}

fn decide(
    key: &str,
    kind: WriteKind,
    body: Option<&Value>,
    expected: Option<Revision>,
    current: Option<&Document>,
    edge: bool,
) -> CoreResult<Mutation> {
    match kind {
        WriteKind::Create(mode, merge) => match current {
            None => checked_edge(require_body(body)?.clone(), edge),
            Some(existing) => match mode {
                OverwriteMode::Conflict => Err(CoreError::conflict(format!(
                    "unique constraint violated: {key}"
                ))),
                OverwriteMode::Replace => {
                    check_precondition(key, expected, existing)?;
                    checked_edge(require_body(body)?.clone(), edge)
                }
                OverwriteMode::Update => {
                    check_precondition(key, expected, existing)?;
                    checked_edge(existing.body().merged(require_body(body)?, merge), edge)
                }
                OverwriteMode::Ignore => Ok(Mutation::Skip),
            },
        },
        WriteKind::Put => {
            match (current, expected) {
                (Some(existing), _) => check_precondition(key, expected, existing)?,
                (None, Some(expected)) => {
                    return Err(CoreError::precondition_failed(key, expected, None))
                }
                (None, None) => {}
            }
            checked_edge(require_body(body)?.clone(), edge)
        }
        WriteKind::Replace => {
            let existing = current.ok_or_else(|| CoreError::document_not_found(key))?;
            check_precondition(key, expected, existing)?;
            checked_edge(require_body(body)?.clone(), edge)
        }
        WriteKind::Update(merge) => {
            let existing = current.ok_or_else(|| CoreError::document_not_found(key))?;
            check_precondition(key, expected, existing)?;
            checked_edge(existing.body().merged(require_body(body)?, merge), edge)
        }
        WriteKind::Remove => {
            let existing = current.ok_or_else(|| CoreError::document_not_found(key))?;
            check_precondition(key, expected, existing)?;
            Ok(Mutation::Remove)
        }
    }
}

pub(crate) fn meta_of(key: &str, outcome: &MutationOutcome) -> CoreResult<DocumentMeta> {
    let revision = outcome
        .new
        .as_ref()
        .or(outcome.old.as_ref())
        .map(Document::revision)
        .ok_or_else(|| CoreError::internal(format!("write to {key} produced no version")))?;
    Ok(DocumentMeta {
        key: key.to_string(),
        revision,
        old_revision: outcome.old.as_ref().map(Document::revision),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::NoopDurability;

    fn collection(config: Config) -> Collection {
        Collection::new(
            "users",
            CollectionOptions::new(),
            Arc::new(config),
            Arc::new(NoopDurability),
        )
    }

    fn body(n: i64) -> Value {
        Value::object([("n", Value::from(n))])
    }

    #[test]
    fn put_get_remove() {
        let users = collection(Config::default());
        let meta = users.put("a", body(1), None).unwrap();
        assert_eq!(meta.old_revision, None);

        let doc = users.get("a").unwrap();
        assert_eq!(doc.revision(), meta.revision);
        assert_eq!(doc.body(), &body(1));

        let removed = users.remove("a", Some(meta.revision)).unwrap();
        assert_eq!(removed.old_revision, Some(meta.revision));
        assert!(removed.revision > meta.revision);
        assert!(users.get("a").unwrap_err().is_not_found());
        assert!(users.remove("a", None).unwrap_err().is_not_found());
    }

    #[test]
    fn empty_key_is_invalid() {
        let users = collection(Config::default());
        assert_eq!(
            users.put("", body(1), None).unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
        assert_eq!(
            users.get("").unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn stale_precondition_is_rejected() {
        let users = collection(Config::default());
        let first = users.put("a", body(1), None).unwrap();
        let second = users.put("a", body(2), Some(first.revision)).unwrap();

        let err = users.put("a", body(3), Some(first.revision)).unwrap_err();
        assert_eq!(
            err,
            CoreError::precondition_failed("a", first.revision, Some(second.revision))
        );
        assert_eq!(users.get("a").unwrap().body(), &body(2));
        assert_eq!(users.stats().precondition_failures, 1);

        assert!(users.put("a", body(3), Some(second.revision)).is_ok());
    }

    #[test]
    fn expected_revision_on_missing_key() {
        let users = collection(Config::default());
        let err = users.put("a", body(1), Some(Revision::new(5))).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PreconditionFailed);
    }

    #[test]
    fn system_attributes_are_stripped() {
        let users = collection(Config::default());
        let input = Value::object([
            ("_key", Value::from("other")),
            ("_rev", Value::from("1")),
            ("x", Value::from(1)),
        ]);
        users.put("a", input, None).unwrap();
        assert_eq!(
            users.get("a").unwrap().body(),
            &Value::object([("x", Value::from(1))])
        );
    }

    #[test]
    fn non_object_body_is_invalid() {
        let users = collection(Config::default());
        assert!(users.put("a", Value::from(3), None).is_err());
    }

    #[test]
    fn edge_collections_require_endpoints() {
        let edges = Collection::new(
            "knows",
            CollectionOptions::edge(),
            Arc::new(Config::default()),
            Arc::new(NoopDurability),
        );
        assert!(edges.put("e", body(1), None).is_err());
        let edge = Value::object([("_from", Value::from("v/1")), ("_to", Value::from("v/2"))]);
        assert!(edges.put("e", edge, None).is_ok());
    }

    #[test]
    fn replicated_versions_only_move_forward() {
        let users = collection(Config::default());
        let newer = Document::new("a", Revision::new(u64::MAX / 2), body(1));
        assert!(users.apply_replicated(newer.clone()).unwrap());
        let older = Document::new("a", Revision::new(5), body(0));
        assert!(!users.apply_replicated(older).unwrap());
        assert_eq!(users.get("a").unwrap(), newer);

        assert!(users
            .apply_replicated_removal("a", Revision::new(u64::MAX / 2 + 1))
            .unwrap());
        assert!(users.get("a").is_err());
    }

    #[test]
    fn truncate_tombstones_everything() {
        let users = collection(Config::default());
        for key in ["a", "b", "c"] {
            users.put(key, body(1), None).unwrap();
        }
        assert_eq!(users.truncate().unwrap(), 3);
        assert!(users.is_empty());
        assert_eq!(users.stats().removes, 3);
    }

    #[test]
    fn auto_compaction_runs() {
        let users = collection(Config::default().auto_compact_interval(4));
        for n in 0..4 {
            users.put("a", body(n), None).unwrap();
        }
        assert_eq!(users.stats().compactions, 1);
        assert_eq!(users.get("a").unwrap().body(), &body(3));
    }

    #[test]
    fn key_resolution_order() {
        let users = collection(Config::default());
        let with_key = Value::object([("_key", Value::from("k1"))]);
        assert_eq!(users.resolve_key(Some("x"), &with_key).unwrap(), "x");
        assert_eq!(users.resolve_key(None, &with_key).unwrap(), "k1");
        assert_eq!(users.resolve_key(None, &body(1)).unwrap(), "1");
        let bad = Value::object([("_key", Value::from(1))]);
        assert!(users.resolve_key(None, &bad).is_err());
    }
}
