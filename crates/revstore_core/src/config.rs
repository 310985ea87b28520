//! Database and collection configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Which key generator a collection uses for auto-assigned keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyGeneratorKind {
    /// Increasing decimal counter.
    #[default]
    Traditional,
    /// Random UUID v4 strings.
    Uuid,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Children per internal tree node.
    pub branch_factor: u32,

    /// Target number of live documents per tree leaf.
    pub leaf_granularity: usize,

    /// Maximum revisions returned by one range page.
    pub range_page_size: usize,

    /// Maximum revisions accepted by one document fetch.
    pub document_page_size: usize,

    /// TTL used when a snapshot is created without one.
    pub default_snapshot_ttl: Duration,

    /// Upper bound for snapshot TTLs; longer requests are clamped.
    pub max_snapshot_ttl: Duration,

    /// Default for the `wait_for_sync` batch modifier.
    pub wait_for_sync: bool,

    /// Worker threads used by one batch.
    pub batch_parallelism: usize,

    /// Minimum batch size before items are fanned out to workers.
    pub parallel_batch_threshold: usize,

    /// Key generator for new collections.
    pub key_generator: KeyGeneratorKind,

    /// Compact a collection after this many mutations (0 = never).
    pub auto_compact_interval: u64,

    /// Number of lock shards in each collection's key index.
    pub shard_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            branch_factor: 8,
            leaf_granularity: 8,
            range_page_size: 1000,
            document_page_size: 1000,
            default_snapshot_ttl: Duration::from_secs(300),
            max_snapshot_ttl: Duration::from_secs(3600),
            wait_for_sync: false,
            batch_parallelism: cores.min(8),
            parallel_batch_threshold: 64,
            key_generator: KeyGeneratorKind::Traditional,
            auto_compact_interval: 0, // disabled
            shard_count: 64,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tree branch factor.
    #[must_use]
    pub const fn branch_factor(mut self, value: u32) -> Self {
        self.branch_factor = value;
        self
    }

    /// Sets the target documents per leaf.
    #[must_use]
    pub const fn leaf_granularity(mut self, value: usize) -> Self {
        self.leaf_granularity = value;
        self
    }

    /// Sets the range page size.
    #[must_use]
    pub const fn range_page_size(mut self, value: usize) -> Self {
        self.range_page_size = value;
        self
    }

    /// Sets the document page size.
    #[must_use]
    pub const fn document_page_size(mut self, value: usize) -> Self {
        self.document_page_size = value;
        self
    }

    /// Sets the default snapshot TTL.
    #[must_use]
    pub const fn default_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.default_snapshot_ttl = ttl;
        self
    }

    /// Sets the maximum snapshot TTL.
    #[must_use]
    pub const fn max_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.max_snapshot_ttl = ttl;
        self
    }

    /// Sets the default `wait_for_sync` behaviour.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = value;
        self
    }

    /// Sets the worker count per batch.
    #[must_use]
    pub const fn batch_parallelism(mut self, value: usize) -> Self {
        self.batch_parallelism = value;
        self
    }

    /// Sets the minimum batch size for parallel execution.
    #[must_use]
    pub const fn parallel_batch_threshold(mut self, value: usize) -> Self {
        self.parallel_batch_threshold = value;
        self
    }

    /// Sets the key generator.
    #[must_use]
    pub const fn key_generator(mut self, kind: KeyGeneratorKind) -> Self {
        self.key_generator = kind;
        self
    }

    /// Sets the auto compaction interval.
    #[must_use]
    pub const fn auto_compact_interval(mut self, mutations: u64) -> Self {
        self.auto_compact_interval = mutations;
        self
    }

    /// Sets the number of key index shards.
    #[must_use]
    pub const fn shard_count(mut self, value: usize) -> Self {
        self.shard_count = value;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first bad field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.branch_factor < 2 {
            return Err(CoreError::invalid_argument(
                "branch_factor must be at least 2",
            ));
        }
        if self.leaf_granularity == 0 {
            return Err(CoreError::invalid_argument("leaf_granularity must be > 0"));
        }
        if self.range_page_size == 0 || self.document_page_size == 0 {
            return Err(CoreError::invalid_argument("page sizes must be > 0"));
        }
        if self.default_snapshot_ttl.is_zero() || self.max_snapshot_ttl.is_zero() {
            return Err(CoreError::invalid_argument("snapshot TTLs must be > 0"));
        }
        if self.batch_parallelism == 0 {
            return Err(CoreError::invalid_argument("batch_parallelism must be > 0"));
        }
        if self.shard_count == 0 {
            return Err(CoreError::invalid_argument("shard_count must be > 0"));
        }
        Ok(())
    }
}

/// Kind of documents a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionKind {
    /// Plain documents.
    #[default]
    Document,
    /// Edges with `_from` and `_to` endpoints.
    Edge,
}

/// Replication scheme supported by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationVersion {
    /// Revision tree reconciliation.
    #[default]
    RevisionTree,
    /// Older scheme without tree support. Tree and range queries are
    /// rejected as unimplemented.
    Legacy,
}

/// Per-collection options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Document or edge collection.
    pub kind: CollectionKind,
    /// Replication scheme.
    pub replication: ReplicationVersion,
    /// Overrides the database `wait_for_sync` default.
    pub wait_for_sync: Option<bool>,
}

impl CollectionOptions {
    /// Options for a document collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for an edge collection.
    #[must_use]
    pub fn edge() -> Self {
        Self::default().kind(CollectionKind::Edge)
    }

    /// Sets the collection kind.
    #[must_use]
    pub const fn kind(mut self, kind: CollectionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the replication scheme.
    #[must_use]
    pub const fn replication(mut self, version: ReplicationVersion) -> Self {
        self.replication = version;
        self
    }

    /// Sets the `wait_for_sync` override.
    #[must_use]
    pub const fn wait_for_sync(mut self, value: bool) -> Self {
        self.wait_for_sync = Some(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.branch_factor, 8);
        assert_eq!(config.range_page_size, 1000);
        assert!(!config.wait_for_sync);
        assert!(config.batch_parallelism >= 1 && config.batch_parallelism <= 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .branch_factor(4)
            .leaf_granularity(2)
            .wait_for_sync(true)
            .key_generator(KeyGeneratorKind::Uuid);

        assert_eq!(config.branch_factor, 4);
        assert_eq!(config.leaf_granularity, 2);
        assert!(config.wait_for_sync);
        assert_eq!(config.key_generator, KeyGeneratorKind::Uuid);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(Config::new().branch_factor(1).validate().is_err());
        assert!(Config::new().range_page_size(0).validate().is_err());
        assert!(Config::new()
            .default_snapshot_ttl(Duration::ZERO)
            .validate()
            .is_err());
        assert!(Config::new().shard_count(0).validate().is_err());
    }

    #[test]
    fn collection_options() {
        let options = CollectionOptions::edge()
            .replication(ReplicationVersion::Legacy)
            .wait_for_sync(true);
        assert_eq!(options.kind, CollectionKind::Edge);
        assert_eq!(options.replication, ReplicationVersion::Legacy);
        assert_eq!(options.wait_for_sync, Some(true));
    }
}
