//! # revstore core
//!
//! Revision-indexed document ledger for revstore.
//!
//! This crate provides:
//! - A per-collection ledger of immutable document versions with
//!   optimistic, revision-based concurrency control
//! - Batch mutations with per-item outcomes and bulk import
//! - TTL-bounded snapshots that pin a consistent view of the ledger
//! - Revision trees over a snapshot, tree diff, and resumable revision
//!   range queries for replica reconciliation

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod collection;
mod config;
mod database;
mod document;
mod durability;
mod error;
mod ledger;
mod range;
mod snapshot;
mod stats;
mod tree;
mod types;

pub use batch::{
    BatchOptions, BatchResult, DuplicatePolicy, ImportOptions, ImportStats, Precondition,
};
pub use collection::{Collection, DocumentMeta, OverwriteMode};
pub use config::{CollectionKind, CollectionOptions, Config, KeyGeneratorKind, ReplicationVersion};
pub use database::Database;
pub use document::{
    validate_collection_name, validate_key, Document, KeyGenerator, TraditionalKeyGenerator,
    UuidKeyGenerator, FROM_ATTRIBUTE, ID_ATTRIBUTE, KEY_ATTRIBUTE, MAX_COLLECTION_NAME_LENGTH,
    MAX_KEY_LENGTH, REV_ATTRIBUTE, TO_ATTRIBUTE,
};
pub use durability::{Durability, NoopDurability};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use ledger::CompactionResult;
pub use range::{validate_ranges, RevisionPage};
pub use snapshot::{Snapshot, SnapshotManager};
pub use stats::{LedgerStats, StatsSnapshot};
pub use tree::{diff, revision_digest, RevisionTree, TreeHeader, TreeNode, TREE_VERSION};
pub use types::{BatchId, Revision, RevisionRange, SequenceNumber};

pub use revstore_codec::{MergeOptions, Value};
