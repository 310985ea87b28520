//! Collection statistics.
//!
//! Every collection owns a [`LedgerStats`] whose counters are updated by
//! the ledger, the batch coordinator and the snapshot manager.
//!
//! ```rust,ignore
//! let users = db.collection("users")?;
//! users.put("a", body, None)?;
//!
//! let stats = users.stats();
//! println!("writes: {}", stats.writes);
//! println!("snapshots: {}", stats.snapshots_created);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Collection statistics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct LedgerStats {
    reads: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
    precondition_failures: AtomicU64,
    conflicts: AtomicU64,
    snapshots_created: AtomicU64,
    snapshots_expired: AtomicU64,
    trees_built: AtomicU64,
    compactions: AtomicU64,
}

impl LedgerStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_precondition_failure(&self) {
        self.precondition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot_created(&self) {
        self.snapshots_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot_expired(&self) {
        self.snapshots_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tree_built(&self) {
        self.trees_built.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of document reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of committed writes (creates, updates, replaces).
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of committed removals.
    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected conditional mutations.
    pub fn precondition_failures(&self) -> u64 {
        self.precondition_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of uniqueness conflicts.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of snapshots created.
    pub fn snapshots_created(&self) -> u64 {
        self.snapshots_created.load(Ordering::Relaxed)
    }

    /// Returns the number of snapshots released by TTL expiry.
    pub fn snapshots_expired(&self) -> u64 {
        self.snapshots_expired.load(Ordering::Relaxed)
    }

    /// Returns the number of revision trees built.
    pub fn trees_built(&self) -> u64 {
        self.trees_built.load(Ordering::Relaxed)
    }

    /// Returns the number of compaction passes.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            removes: self.removes(),
            precondition_failures: self.precondition_failures(),
            conflicts: self.conflicts(),
            snapshots_created: self.snapshots_created(),
            snapshots_expired: self.snapshots_expired(),
            trees_built: self.trees_built(),
            compactions: self.compactions(),
        }
    }
}

/// A point-in-time copy of [`LedgerStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Document reads.
    pub reads: u64,
    /// Committed writes.
    pub writes: u64,
    /// Committed removals.
    pub removes: u64,
    /// Rejected conditional mutations.
    pub precondition_failures: u64,
    /// Uniqueness conflicts.
    pub conflicts: u64,
    /// Snapshots created.
    pub snapshots_created: u64,
    /// Snapshots released by expiry.
    pub snapshots_expired: u64,
    /// Revision trees built.
    pub trees_built: u64,
    /// Compaction passes.
    pub compactions: u64,
}
