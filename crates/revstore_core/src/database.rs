//! Database facade.

use crate::batch::{BatchOptions, BatchResult, ImportOptions, ImportStats};
use crate::collection::{Collection, DocumentMeta};
use crate::config::{CollectionOptions, Config};
use crate::document::{validate_collection_name, Document};
use crate::durability::{Durability, NoopDurability};
use crate::error::{CoreError, CoreResult};
use crate::ledger::CompactionResult;
use crate::range::RevisionPage;
use crate::snapshot::{Snapshot, SnapshotManager};
use crate::stats::StatsSnapshot;
use crate::tree::RevisionTree;
use crate::types::{BatchId, Revision, RevisionRange};
use parking_lot::RwLock;
use revstore_codec::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The main database handle.
///
/// `Database` owns a set of named collections and the snapshot registry.
/// Every operation is available here addressed by collection name, and
/// directly on the [`Collection`] handles returned by
/// [`Database::collection`].
///
/// ```rust,ignore
/// use revstore_core::{CollectionOptions, Database};
///
/// let db = Database::open_in_memory()?;
/// db.create_collection("users", CollectionOptions::new())?;
/// let meta = db.put("users", "alice", body, None)?;
///
/// let batch = db.create_snapshot("users", None)?;
/// let tree = db.build_tree(batch)?;
/// db.delete_snapshot(batch)?;
/// ```
#[derive(Debug)]
pub struct Database {
    /// Configuration shared by every collection.
    config: Arc<Config>,
    /// Collections by name.
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    /// Live snapshots.
    snapshots: SnapshotManager,
    /// Flush hook for `wait_for_sync`.
    durability: Arc<dyn Durability>,
}

impl Database {
    /// Opens an empty database.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn open(config: Config) -> CoreResult<Self> {
        Self::open_with_durability(config, Arc::new(NoopDurability))
    }

    /// Opens an empty database with the default configuration.
    ///
    /// # Errors
    ///
    /// Never fails with the default configuration; the signature matches
    /// [`Database::open`].
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Config::default())
    }

    /// Opens an empty database flushing through `durability`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn open_with_durability(config: Config, durability: Arc<dyn Durability>) -> CoreResult<Self> {
        config.validate()?;
        let snapshots = SnapshotManager::new(config.default_snapshot_ttl, config.max_snapshot_ttl);
        debug!(
            branch_factor = config.branch_factor,
            leaf_granularity = config.leaf_granularity,
            batch_parallelism = config.batch_parallelism,
            "opened database"
        );
        Ok(Self {
            config: Arc::new(config),
            collections: RwLock::new(HashMap::new()),
            snapshots,
            durability,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Creates a collection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid name and `Conflict` if a
    /// collection with that name exists.
    pub fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> CoreResult<Arc<Collection>> {
        validate_collection_name(name)?;
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(CoreError::conflict(format!("collection {name} already exists")));
        }
        let collection = Arc::new(Collection::new(
            name,
            options,
            Arc::clone(&self.config),
            Arc::clone(&self.durability),
        ));
        collections.insert(name.to_string(), Arc::clone(&collection));
        info!(collection = %name, kind = ?options.kind, replication = ?options.replication, "created collection");
        Ok(collection)
    }

    /// Returns the named collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if it does not exist.
    pub fn collection(&self, name: &str) -> CoreResult<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::collection_not_found(name))
    }

    /// Drops the named collection and every snapshot taken of it.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if it does not exist.
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        self.collections
            .write()
            .remove(name)
            .ok_or_else(|| CoreError::collection_not_found(name))?;
        self.snapshots.release_collection(name);
        info!(collection = %name, "dropped collection");
        Ok(())
    }

    /// Returns the collection names, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Reads one document.
    ///
    /// # Errors
    ///
    /// See [`Collection::get`].
    pub fn get(&self, collection: &str, key: &str) -> CoreResult<Document> {
        self.collection(collection)?.get(key)
    }

    /// Creates or replaces one document.
    ///
    /// # Errors
    ///
    /// See [`Collection::put`].
    pub fn put(
        &self,
        collection: &str,
        key: &str,
        body: Value,
        expected: Option<Revision>,
    ) -> CoreResult<DocumentMeta> {
        self.collection(collection)?.put(key, body, expected)
    }

    /// Removes one document.
    ///
    /// # Errors
    ///
    /// See [`Collection::remove`].
    pub fn remove(
        &self,
        collection: &str,
        key: &str,
        expected: Option<Revision>,
    ) -> CoreResult<DocumentMeta> {
        self.collection(collection)?.remove(key, expected)
    }

    /// Batch create. See [`Collection::create_many`].
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` or the batch-level errors of the
    /// collection operation.
    pub fn create_many(
        &self,
        collection: &str,
        keys: Option<&[String]>,
        bodies: Option<&[Value]>,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        self.collection(collection)?.create_many(keys, bodies, options)
    }

    /// Batch read. See [`Collection::read_many`].
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the collection does not exist.
    pub fn read_many(
        &self,
        collection: &str,
        keys: &[String],
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        self.collection(collection)?.read_many(keys, options)
    }

    /// Batch update. See [`Collection::update_many`].
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` or the batch-level errors of the
    /// collection operation.
    pub fn update_many(
        &self,
        collection: &str,
        keys: &[String],
        updates: Option<&[Value]>,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        self.collection(collection)?.update_many(keys, updates, options)
    }

    /// Batch replace. See [`Collection::replace_many`].
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` or the batch-level errors of the
    /// collection operation.
    pub fn replace_many(
        &self,
        collection: &str,
        keys: &[String],
        bodies: Option<&[Value]>,
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        self.collection(collection)?.replace_many(keys, bodies, options)
    }

    /// Batch remove. See [`Collection::remove_many`].
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` or the batch-level errors of the
    /// collection operation.
    pub fn remove_many(
        &self,
        collection: &str,
        keys: &[String],
        options: &BatchOptions,
    ) -> CoreResult<BatchResult> {
        self.collection(collection)?.remove_many(keys, options)
    }

    /// Bulk import. See [`Collection::import`].
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` or the errors of the import.
    pub fn import(
        &self,
        collection: &str,
        entries: &[Value],
        options: &ImportOptions,
    ) -> CoreResult<ImportStats> {
        self.collection(collection)?.import(entries, options)
    }

    // ========================================================================
    // Snapshots and reconciliation
    // ========================================================================

    /// Freezes the current state of a collection.
    ///
    /// `ttl` defaults to the configured snapshot TTL and is clamped to the
    /// configured maximum.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` or `InvalidArgument` for a zero TTL.
    pub fn create_snapshot(&self, collection: &str, ttl: Option<Duration>) -> CoreResult<BatchId> {
        let collection = self.collection(collection)?;
        self.snapshots.create(&collection, ttl)
    }

    /// Returns a live snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` for unknown, deleted or expired ids.
    pub fn snapshot(&self, batch_id: BatchId) -> CoreResult<Arc<Snapshot>> {
        self.snapshots.get(batch_id)
    }

    /// Releases a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` if the id is unknown.
    pub fn delete_snapshot(&self, batch_id: BatchId) -> CoreResult<()> {
        self.snapshots.delete(batch_id)
    }

    /// Extends the lease of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` or `InvalidArgument` for a zero TTL.
    pub fn renew_snapshot(&self, batch_id: BatchId, ttl: Option<Duration>) -> CoreResult<()> {
        self.snapshots.renew(batch_id, ttl)
    }

    /// Releases every expired snapshot.
    pub fn sweep_expired_snapshots(&self) -> usize {
        self.snapshots.sweep_expired()
    }

    /// Number of registered snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Builds the revision tree of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` or `Unimplemented` for legacy
    /// collections.
    pub fn build_tree(&self, batch_id: BatchId) -> CoreResult<RevisionTree> {
        self.snapshots.get(batch_id)?.build_tree()
    }

    /// Pages through the revisions of a snapshot that fall into `ranges`.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound`, `Unimplemented` for legacy collections,
    /// or `InvalidArgument` for malformed ranges.
    pub fn revisions_in_ranges(
        &self,
        batch_id: BatchId,
        ranges: &[RevisionRange],
        resume: Option<Revision>,
    ) -> CoreResult<RevisionPage> {
        self.snapshots
            .get(batch_id)?
            .revisions_in_ranges(ranges, resume)
    }

    /// Fetches snapshot documents by revision, aligned with the input.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound`, `Unimplemented` for legacy collections,
    /// or `InvalidArgument` for oversized requests.
    pub fn documents_for_revisions(
        &self,
        batch_id: BatchId,
        revisions: &[Revision],
    ) -> CoreResult<Vec<Option<Document>>> {
        self.snapshots
            .get(batch_id)?
            .documents_for_revisions(revisions)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Sweeps expired snapshots, then compacts the collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if it does not exist.
    pub fn compact(&self, collection: &str) -> CoreResult<CompactionResult> {
        let collection = self.collection(collection)?;
        self.snapshots.sweep_expired();
        let result = collection.compact();
        info!(
            collection = %collection.name(),
            versions_removed = result.versions_removed,
            tombstones_removed = result.tombstones_removed,
            keys_retired = result.keys_retired,
            keys_skipped = result.keys_skipped,
            "compacted collection"
        );
        Ok(result)
    }

    /// Returns a statistics snapshot of a collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if it does not exist.
    pub fn stats(&self, collection: &str) -> CoreResult<StatsSnapshot> {
        Ok(self.collection(collection)?.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn body(n: i64) -> Value {
        Value::object([("n", Value::from(n))])
    }

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_collection("docs", CollectionOptions::new()).unwrap();
        db
    }

    #[test]
    fn open_rejects_invalid_config() {
        let err = Database::open(Config::default().branch_factor(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn collection_lifecycle() {
        let db = db();
        assert_eq!(
            db.create_collection("docs", CollectionOptions::new())
                .unwrap_err()
                .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            db.create_collection("", CollectionOptions::new())
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArgument
        );
        db.create_collection("edges", CollectionOptions::edge()).unwrap();
        assert_eq!(db.collection_names(), vec!["docs", "edges"]);

        db.drop_collection("edges").unwrap();
        assert!(db.collection("edges").unwrap_err().is_not_found());
        assert!(db.drop_collection("edges").is_err());
    }

    #[test]
    fn facade_routes_by_name() {
        let db = db();
        let meta = db.put("docs", "a", body(1), None).unwrap();
        assert_eq!(db.get("docs", "a").unwrap().revision(), meta.revision);
        assert!(db.get("missing", "a").unwrap_err().is_not_found());

        db.remove("docs", "a", Some(meta.revision)).unwrap();
        assert!(db.get("docs", "a").unwrap_err().is_not_found());
        assert_eq!(db.stats("docs").unwrap().removes, 1);
    }

    #[test]
    fn snapshot_queries_through_facade() {
        let db = db();
        for i in 0..10 {
            db.put("docs", &format!("k{i}"), body(i), None).unwrap();
        }
        let batch = db.create_snapshot("docs", None).unwrap();
        db.put("docs", "late", body(99), None).unwrap();

        let tree = db.build_tree(batch).unwrap();
        assert_eq!(tree.count(), 10);

        let page = db
            .revisions_in_ranges(batch, &[RevisionRange::full()], None)
            .unwrap();
        assert_eq!(page.revisions.len(), 10);
        assert!(!page.has_more());

        let docs = db.documents_for_revisions(batch, &page.revisions).unwrap();
        assert!(docs.iter().all(Option::is_some));

        db.delete_snapshot(batch).unwrap();
        assert!(db.build_tree(batch).unwrap_err().is_not_found());
        assert_eq!(db.snapshot_count(), 0);
    }

    #[test]
    fn dropping_a_collection_releases_its_snapshots() {
        let db = db();
        let batch = db.create_snapshot("docs", None).unwrap();
        db.drop_collection("docs").unwrap();
        assert!(db.snapshot(batch).is_err());
    }

    #[test]
    fn compaction_after_snapshot_release() {
        let db = db();
        db.put("docs", "a", body(1), None).unwrap();
        let batch = db.create_snapshot("docs", None).unwrap();
        db.put("docs", "a", body(2), None).unwrap();

        assert_eq!(db.compact("docs").unwrap().versions_removed, 0);
        db.delete_snapshot(batch).unwrap();
        assert_eq!(db.compact("docs").unwrap().versions_removed, 1);
        assert_eq!(db.get("docs", "a").unwrap().body(), &body(2));
    }
}
