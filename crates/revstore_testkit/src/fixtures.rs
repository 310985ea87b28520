//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use revstore_core::{
    CollectionOptions, Config, Database, Durability, Revision, RevisionRange, Value,
};
use std::sync::Arc;

/// A shared in-memory test database.
#[derive(Debug, Clone)]
pub struct TestDatabase {
    db: Arc<Database>,
}

impl TestDatabase {
    /// Creates an empty in-memory database with default configuration.
    pub fn memory() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an empty in-memory database with `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            db: Arc::new(Database::open(config).expect("Failed to open database")),
        }
    }

    /// Creates an empty database whose flushes go through `durability`.
    pub fn with_durability(config: Config, durability: Arc<dyn Durability>) -> Self {
        let db = Database::open_with_durability(config, durability)
            .expect("Failed to open database");
        Self { db: Arc::new(db) }
    }

    /// Creates a database holding one empty document collection.
    pub fn with_collection(name: &str) -> Self {
        let test_db = Self::memory();
        test_db.create(name);
        test_db
    }

    /// Creates a document collection with default options.
    pub fn create(&self, name: &str) {
        self.db
            .create_collection(name, CollectionOptions::new())
            .expect("Failed to create collection");
    }

    /// Returns the shared database handle.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Returns `(key, revision)` for every live document, sorted by key.
    ///
    /// Reads through a short-lived snapshot, so concurrent writers do not
    /// tear the listing.
    pub fn live_revisions(&self, collection: &str) -> Vec<(String, Revision)> {
        let batch = self
            .db
            .create_snapshot(collection, None)
            .expect("Failed to create snapshot");
        let snapshot = self.db.snapshot(batch).expect("Snapshot vanished");

        let mut revisions = Vec::new();
        let mut resume = None;
        loop {
            let page = snapshot
                .revisions_in_ranges(&[RevisionRange::full()], resume)
                .expect("Failed to list revisions");
            revisions.extend(page.revisions);
            match page.next_resume {
                Some(next) => resume = Some(next),
                None => break,
            }
        }

        let page_size = self.db.config().document_page_size;
        let mut live: Vec<(String, Revision)> = revisions
            .chunks(page_size)
            .flat_map(|chunk| {
                snapshot
                    .documents_for_revisions(chunk)
                    .expect("Failed to fetch documents")
            })
            .flatten()
            .map(|doc| (doc.key().to_string(), doc.revision()))
            .collect();
        live.sort();

        drop(snapshot);
        self.db.delete_snapshot(batch).expect("Failed to delete snapshot");
        live
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::memory()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// The database has one empty collection named `docs`.
///
/// # Example
///
/// ```rust,ignore
/// use revstore_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.put("docs", "a", Value::empty_object(), None).unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::with_collection("docs");
    f(test_db.database().as_ref())
}

/// Body stored by the populating fixtures for document `i`.
pub fn numbered_body(i: usize) -> Value {
    Value::object([
        ("n", Value::Integer(i as i64)),
        ("label", Value::from(format!("item-{i}"))),
    ])
}

/// Creates a database whose `collection` holds `count` documents keyed
/// `k0`, `k1`, ... with [`numbered_body`] bodies.
pub fn populated_database(collection: &str, count: usize) -> TestDatabase {
    let test_db = TestDatabase::with_collection(collection);
    populate(&test_db, collection, count);
    test_db
}

/// Writes `count` numbered documents into an existing collection.
pub fn populate(db: &Database, collection: &str, count: usize) {
    for i in 0..count {
        db.put(collection, &format!("k{i}"), numbered_body(i), None)
            .expect("Failed to put document");
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a database with `collection_count` collections named
    /// `collection_0`, ... each holding one document.
    pub fn multi_collection_database(collection_count: usize) -> (TestDatabase, Vec<String>) {
        let test_db = TestDatabase::memory();
        let mut names = Vec::with_capacity(collection_count);

        for i in 0..collection_count {
            let name = format!("collection_{i}");
            test_db.create(&name);
            test_db
                .put(&name, "only", numbered_body(i), None)
                .expect("Failed to put document");
            names.push(name);
        }

        (test_db, names)
    }

    /// Creates two replicas of `collection`: a leader with `count`
    /// documents and an empty follower.
    pub fn leader_and_follower(collection: &str, count: usize) -> (TestDatabase, TestDatabase) {
        (
            populated_database(collection, count),
            TestDatabase::with_collection(collection),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_temp_db() {
        let len = with_temp_db(|db| {
            db.put("docs", "a", Value::empty_object(), None).unwrap();
            db.collection("docs").unwrap().len()
        });
        assert_eq!(len, 1);
    }

    #[test]
    fn test_populated_database() {
        let test_db = populated_database("docs", 10);
        let doc = test_db.get("docs", "k3").unwrap();
        assert_eq!(doc.body().get("n"), Some(&Value::Integer(3)));
    }

    #[test]
    fn live_revisions_skip_removed_documents() {
        let test_db = populated_database("docs", 5);
        test_db.remove("docs", "k1", None).unwrap();

        let live = test_db.live_revisions("docs");
        let keys: Vec<&str> = live.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k2", "k3", "k4"]);
        assert_eq!(test_db.snapshot_count(), 0);
    }

    #[test]
    fn live_revisions_page_through_small_pages() {
        let test_db = TestDatabase::with_config(
            Config::default().range_page_size(7).document_page_size(5),
        );
        test_db.create("docs");
        populate(&test_db, "docs", 40);
        assert_eq!(test_db.live_revisions("docs").len(), 40);
    }

    #[test]
    fn test_multi_collection_scenario() {
        let (test_db, names) = scenarios::multi_collection_database(3);
        assert_eq!(test_db.collection_names(), names);
    }
}
