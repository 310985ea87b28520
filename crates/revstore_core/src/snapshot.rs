//! Snapshots ("batches").
//!
//! A snapshot pins the stable watermark of one collection's ledger. Reads
//! through it resolve every key to the newest version at or below that
//! watermark, so later writes stay invisible while writers continue
//! unhindered. The pin is released when the last handle to the snapshot
//! is dropped, which lets compaction reclaim the versions it protected.
//!
//! Snapshots expire after their TTL. Expiry is checked on every access,
//! including reads through a handle obtained before the deadline, and by
//! [`SnapshotManager::sweep_expired`]. The ledger pin carries the same
//! deadline, so an expired snapshot stops holding back compaction even
//! while a caller still owns a handle to it.

use crate::collection::Collection;
use crate::config::ReplicationVersion;
use crate::document::{validate_key, Document};
use crate::error::{CoreError, CoreResult};
use crate::ledger::{Ledger, PinTicket};
use crate::range::{RevisionIndex, RevisionPage};
use crate::tree::RevisionTree;
use crate::types::{BatchId, Revision, RevisionRange, SequenceNumber};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug)]
struct WatermarkPin {
    ledger: Arc<Ledger>,
    ticket: PinTicket,
}

impl Drop for WatermarkPin {
    fn drop(&mut self) {
        self.ledger.unpin(self.ticket);
    }
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    ttl: Duration,
    expires_at: Instant,
}

/// A frozen, TTL-bounded view of one collection.
#[derive(Debug)]
pub struct Snapshot {
    id: BatchId,
    collection: Arc<Collection>,
    pin: WatermarkPin,
    created_at: Instant,
    lease: Mutex<Lease>,
    index: OnceLock<RevisionIndex>,
}

impl Snapshot {
    fn new(id: BatchId, collection: Arc<Collection>, ttl: Duration) -> Self {
        let ledger = Arc::clone(collection.ledger());
        let created_at = Instant::now();
        let expires_at = created_at + ttl;
        let ticket = ledger.pin(Some(expires_at));
        Self {
            id,
            collection,
            pin: WatermarkPin { ledger, ticket },
            created_at,
            lease: Mutex::new(Lease { ttl, expires_at }),
            index: OnceLock::new(),
        }
    }

    /// Returns the batch id.
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Returns the name of the snapshotted collection.
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Commit sequence this snapshot observes.
    pub fn watermark(&self) -> SequenceNumber {
        self.pin.ticket.watermark()
    }

    /// When the snapshot was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Current TTL.
    pub fn ttl(&self) -> Duration {
        self.lease.lock().ttl
    }

    /// When the snapshot expires unless renewed.
    pub fn expires_at(&self) -> Instant {
        self.lease.lock().expires_at
    }

    /// Returns true if the snapshot has expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.lease.lock().expires_at
    }

    fn renew(&self, ttl: Duration) {
        let mut lease = self.lease.lock();
        lease.ttl = ttl;
        lease.expires_at = Instant::now() + ttl;
        self.pin.ledger.extend_pin(self.pin.ticket, Some(lease.expires_at));
    }

    fn require_live(&self) -> CoreResult<()> {
        if self.is_expired_at(Instant::now()) {
            return Err(CoreError::SnapshotNotFound { batch_id: self.id });
        }
        Ok(())
    }

    /// Reads `key` as of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a malformed key and `SnapshotNotFound`
    /// once the snapshot has expired.
    pub fn get(&self, key: &str) -> CoreResult<Option<Document>> {
        self.require_live()?;
        validate_key(key)?;
        Ok(self.pin.ledger.get_at(key, self.watermark()))
    }

    /// Number of live documents in the snapshot.
    pub fn len(&self) -> usize {
        self.index().len()
    }

    /// Returns true if the snapshot holds no live document.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self) -> &RevisionIndex {
        self.index
            .get_or_init(|| RevisionIndex::build(&self.pin.ledger, self.watermark()))
    }

    fn require_tree_support(&self) -> CoreResult<()> {
        match self.collection.options().replication {
            ReplicationVersion::RevisionTree => Ok(()),
            ReplicationVersion::Legacy => Err(CoreError::unimplemented(format!(
                "collection {} does not support revision trees",
                self.collection.name()
            ))),
        }
    }

    /// Builds the revision tree of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Unimplemented` for legacy collections and `SnapshotNotFound`
    /// once the snapshot has expired.
    pub fn build_tree(&self) -> CoreResult<RevisionTree> {
        self.require_live()?;
        self.require_tree_support()?;
        let config = self.collection.config();
        let tree = RevisionTree::build(
            &self.index().revisions(),
            config.branch_factor,
            config.leaf_granularity,
        )?;
        self.collection.stats_handle().record_tree_built();
        debug!(
            batch = %self.id,
            collection = %self.collection.name(),
            depth = tree.max_depth(),
            leaves = tree.nodes().len(),
            count = tree.count(),
            "built revision tree"
        );
        Ok(tree)
    }

    /// Returns one page of revisions within `ranges`, starting at `resume`.
    ///
    /// # Errors
    ///
    /// Returns `Unimplemented` for legacy collections and `InvalidArgument`
    /// for malformed ranges. Fails with `SnapshotNotFound` once expired.
    pub fn revisions_in_ranges(
        &self,
        ranges: &[RevisionRange],
        resume: Option<Revision>,
    ) -> CoreResult<RevisionPage> {
        self.require_live()?;
        self.require_tree_support()?;
        self.index()
            .page(ranges, resume, self.collection.config().range_page_size)
    }

    /// Fetches the documents carrying `revisions`, aligned with the input.
    ///
    /// # Errors
    ///
    /// Returns `Unimplemented` for legacy collections and `InvalidArgument`
    /// if more revisions are requested than one page allows. Fails with
    /// `SnapshotNotFound` once expired.
    pub fn documents_for_revisions(&self, revisions: &[Revision]) -> CoreResult<Vec<Option<Document>>> {
        self.require_live()?;
        self.require_tree_support()?;
        let limit = self.collection.config().document_page_size;
        if revisions.len() > limit {
            return Err(CoreError::invalid_argument(format!(
                "requested {} documents, page limit is {limit}",
                revisions.len()
            )));
        }
        let index = self.index();
        Ok(revisions
            .iter()
            .map(|r| index.lookup(*r).cloned())
            .collect())
    }
}

/// Registry of live snapshots.
#[derive(Debug)]
pub struct SnapshotManager {
    next_id: AtomicU64,
    snapshots: RwLock<HashMap<BatchId, Arc<Snapshot>>>,
    default_ttl: Duration,
    max_ttl: Duration,
}

impl SnapshotManager {
    /// Creates a manager with the given TTL defaults.
    pub fn new(default_ttl: Duration, max_ttl: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            snapshots: RwLock::new(HashMap::new()),
            default_ttl,
            max_ttl,
        }
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> CoreResult<Duration> {
        match ttl {
            Some(ttl) if ttl.is_zero() => Err(CoreError::invalid_argument("snapshot TTL must be > 0")),
            Some(ttl) => Ok(ttl.min(self.max_ttl)),
            None => Ok(self.default_ttl.min(self.max_ttl)),
        }
    }

    /// Freezes the current state of `collection`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero TTL.
    pub fn create(&self, collection: &Arc<Collection>, ttl: Option<Duration>) -> CoreResult<BatchId> {
        let ttl = self.effective_ttl(ttl)?;
        self.sweep_expired();

        let id = BatchId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let snapshot = Arc::new(Snapshot::new(id, Arc::clone(collection), ttl));
        collection.stats_handle().record_snapshot_created();
        info!(
            batch = %id,
            collection = %collection.name(),
            watermark = %snapshot.watermark(),
            ttl_ms = ttl.as_millis() as u64,
            "created snapshot"
        );
        self.snapshots.write().insert(id, snapshot);
        Ok(id)
    }

    /// Looks up a live snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` for unknown, deleted or expired ids.
    pub fn get(&self, id: BatchId) -> CoreResult<Arc<Snapshot>> {
        let snapshot = self
            .snapshots
            .read()
            .get(&id)
            .cloned()
            .ok_or(CoreError::SnapshotNotFound { batch_id: id })?;
        if snapshot.is_expired_at(Instant::now()) {
            self.expire(id);
            return Err(CoreError::SnapshotNotFound { batch_id: id });
        }
        Ok(snapshot)
    }

    /// Releases a snapshot early.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` if the id is unknown or already gone.
    pub fn delete(&self, id: BatchId) -> CoreResult<()> {
        let snapshot = self
            .snapshots
            .write()
            .remove(&id)
            .ok_or(CoreError::SnapshotNotFound { batch_id: id })?;
        debug!(batch = %id, collection = %snapshot.collection_name(), "deleted snapshot");
        Ok(())
    }

    /// Extends the lease of a live snapshot from now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero TTL and `SnapshotNotFound` for
    /// unknown or expired ids.
    pub fn renew(&self, id: BatchId, ttl: Option<Duration>) -> CoreResult<()> {
        let ttl = self.effective_ttl(ttl)?;
        let snapshot = self.get(id)?;
        snapshot.renew(ttl);
        debug!(batch = %id, ttl_ms = ttl.as_millis() as u64, "renewed snapshot");
        Ok(())
    }

    /// Releases every expired snapshot. Returns how many were released.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<BatchId> = self
            .snapshots
            .read()
            .iter()
            .filter(|(_, s)| s.is_expired_at(now))
            .map(|(id, _)| *id)
            .collect();
        expired.iter().filter(|id| self.expire(**id)).count()
    }

    fn expire(&self, id: BatchId) -> bool {
        let Some(snapshot) = self.snapshots.write().remove(&id) else {
            return false;
        };
        snapshot.collection.stats_handle().record_snapshot_expired();
        info!(batch = %id, collection = %snapshot.collection_name(), "snapshot expired");
        true
    }

    /// Number of registered snapshots, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Returns true if no snapshot is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every snapshot of the named collection.
    pub(crate) fn release_collection(&self, name: &str) {
        self.snapshots
            .write()
            .retain(|_, s| s.collection_name() != name);
    }
}
