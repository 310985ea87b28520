//! Document ledger.
//!
//! The ledger keeps, per key, the chain of versions that a live snapshot
//! may still observe. Every version records the commit sequence at which
//! it became visible. Snapshots pin a sequence watermark and resolve each
//! key to the newest version at or below it, so writers never wait for
//! readers and readers never copy data.
//!
//! ## Concurrency
//!
//! - Writers serialize per key on the slot's writer mutex. There is no
//!   collection-wide write lock.
//! - The key index is sharded; a shard's write lock is only taken to
//!   insert or retire a slot.
//! - A sequence is "in flight" between reservation and publication. The
//!   stable watermark is one below the oldest in-flight sequence, which
//!   keeps the watermark from skipping over a version that is about to be
//!   published.

mod clock;
mod compaction;

pub use compaction::CompactionResult;

use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::types::{Revision, SequenceNumber};
use clock::RevisionClock;
use parking_lot::{Mutex, RwLock};
use revstore_codec::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

/// A document version and the sequence at which it was published.
#[derive(Debug)]
pub(crate) struct Version {
    pub(crate) seq: SequenceNumber,
    pub(crate) doc: Document,
}

#[derive(Debug, Default)]
struct KeySlot {
    /// Held by the writer of this key. `true` once compaction has retired
    /// the slot; writers that see it look the key up again.
    writer: Mutex<bool>,
    versions: RwLock<Vec<Arc<Version>>>,
}

impl KeySlot {
    fn latest(&self) -> Option<Arc<Version>> {
        self.versions.read().last().cloned()
    }

    fn visible_at(&self, watermark: SequenceNumber) -> Option<Arc<Version>> {
        self.versions
            .read()
            .iter()
            .rev()
            .find(|v| v.seq <= watermark)
            .cloned()
    }
}

/// Handle to one pin taken by [`Ledger::pin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PinTicket {
    id: u64,
    watermark: SequenceNumber,
}

impl PinTicket {
    /// Commit sequence the pin protects.
    pub(crate) fn watermark(self) -> SequenceNumber {
        self.watermark
    }
}

#[derive(Debug, Clone, Copy)]
struct PinEntry {
    watermark: u64,
    expires_at: Option<Instant>,
}

impl PinEntry {
    fn holds_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Debug)]
struct SequenceState {
    next: u64,
    in_flight: BTreeSet<u64>,
    next_pin: u64,
    pins: HashMap<u64, PinEntry>,
}

impl SequenceState {
    fn stable(&self) -> SequenceNumber {
        match self.in_flight.first() {
            Some(&oldest) => SequenceNumber::new(oldest - 1),
            None => SequenceNumber::new(self.next - 1),
        }
    }
}

/// What a writer wants to do with a key, decided under the key lock.
#[derive(Debug)]
pub(crate) enum Mutation {
    /// Store a new live body under a fresh revision.
    Write(Value),
    /// Tombstone the key under a fresh revision.
    Remove,
    /// Store a version minted by another replica, revision included.
    Replicate(Document),
    /// Leave the key untouched.
    Skip,
}

/// Result of [`Ledger::mutate`].
#[derive(Debug, Default)]
pub(crate) struct MutationOutcome {
    /// Live document before the mutation.
    pub(crate) old: Option<Document>,
    /// Version written by the mutation; `None` when skipped.
    pub(crate) new: Option<Document>,
}

/// Returns the live document of a latest version, if any.
pub(crate) fn live(latest: Option<&Document>) -> Option<&Document> {
    latest.filter(|doc| !doc.is_deleted())
}

/// Versioned key/document store for one collection.
#[derive(Debug)]
pub(crate) struct Ledger {
    shards: Box<[RwLock<HashMap<String, Arc<KeySlot>>>]>,
    clock: RevisionClock,
    sequences: Mutex<SequenceState>,
}

impl Ledger {
    pub(crate) fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            clock: RevisionClock::new(),
            sequences: Mutex::new(SequenceState {
                next: 1,
                in_flight: BTreeSet::new(),
                next_pin: 1,
                pins: HashMap::new(),
            }),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, Arc<KeySlot>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn slot(&self, key: &str) -> Option<Arc<KeySlot>> {
        self.shard(key).read().get(key).cloned()
    }

    fn slot_for_write(&self, key: &str) -> Arc<KeySlot> {
        if let Some(slot) = self.slot(key) {
            return slot;
        }
        Arc::clone(self.shard(key).write().entry(key.to_string()).or_default())
    }

    /// Returns the latest live version of `key`.
    pub(crate) fn get(&self, key: &str) -> Option<Document> {
        let version = self.slot(key)?.latest()?;
        (!version.doc.is_deleted()).then(|| version.doc.clone())
    }

    /// Returns the live version of `key` visible at `watermark`.
    pub(crate) fn get_at(&self, key: &str, watermark: SequenceNumber) -> Option<Document> {
        let version = self.slot(key)?.visible_at(watermark)?;
        (!version.doc.is_deleted()).then(|| version.doc.clone())
    }

    /// Calls `f` with every live document visible at `watermark`.
    ///
    /// Shard locks are released before slots are read.
    pub(crate) fn for_each_visible(&self, watermark: SequenceNumber, mut f: impl FnMut(&Document)) {
        for shard in self.shards.iter() {
            let slots: Vec<Arc<KeySlot>> = shard.read().values().cloned().collect();
            for slot in slots {
                if let Some(version) = slot.visible_at(watermark) {
                    if !version.doc.is_deleted() {
                        f(&version.doc);
                    }
                }
            }
        }
    }

    /// Keys that currently have a live document.
    pub(crate) fn live_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for shard in self.shards.iter() {
            let slots: Vec<(String, Arc<KeySlot>)> = shard
                .read()
                .iter()
                .map(|(k, s)| (k.clone(), Arc::clone(s)))
                .collect();
            for (key, slot) in slots {
                if slot.latest().is_some_and(|v| !v.doc.is_deleted()) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Number of live documents.
    pub(crate) fn live_count(&self) -> usize {
        self.live_keys().len()
    }

    /// Applies a mutation to `key` under its writer lock.
    ///
    /// `decide` sees the latest version (tombstones included) and returns
    /// the mutation to perform, or an error that aborts without writing.
    pub(crate) fn mutate<F>(&self, key: &str, decide: F) -> CoreResult<MutationOutcome>
    where
        F: FnOnce(Option<&Document>) -> CoreResult<Mutation>,
    {
        let mut decide = Some(decide);
        loop {
            let slot = self.slot_for_write(key);
            let retired = slot.writer.lock();
            if *retired {
                continue;
            }
            let decide = decide
                .take()
                .ok_or_else(|| CoreError::internal("mutation decided twice"))?;
            return self.apply_locked(key, &slot, decide);
        }
    }

    fn apply_locked<F>(&self, key: &str, slot: &KeySlot, decide: F) -> CoreResult<MutationOutcome>
    where
        F: FnOnce(Option<&Document>) -> CoreResult<Mutation>,
    {
        let latest = slot.latest();
        let latest_doc = latest.as_ref().map(|v| &v.doc);
        let mutation = decide(latest_doc)?;
        let old = live(latest_doc).cloned();
        let floor = latest_doc.map(Document::revision);

        let doc = match mutation {
            Mutation::Skip => return Ok(MutationOutcome { old, new: None }),
            Mutation::Write(body) => Document::new(key, self.clock.tick_after(floor), body),
            Mutation::Remove => Document::tombstone(key, self.clock.tick_after(floor)),
            Mutation::Replicate(doc) => {
                if doc.key() != key || floor.is_some_and(|f| doc.revision() <= f) {
                    return Err(CoreError::internal(format!(
                        "replicated version of {} does not advance {key}",
                        doc.key()
                    )));
                }
                self.clock.observe(doc.revision());
                doc
            }
        };

        let seq = self.reserve_sequence();
        slot.versions.write().push(Arc::new(Version {
            seq,
            doc: doc.clone(),
        }));
        self.publish_sequence(seq);

        Ok(MutationOutcome {
            old,
            new: Some(doc),
        })
    }

    fn reserve_sequence(&self) -> SequenceNumber {
        let mut state = self.sequences.lock();
        let seq = state.next;
        state.next += 1;
        state.in_flight.insert(seq);
        SequenceNumber::new(seq)
    }

    fn publish_sequence(&self, seq: SequenceNumber) {
        self.sequences.lock().in_flight.remove(&seq.as_u64());
    }

    /// Highest sequence below which every version is published.
    pub(crate) fn stable_watermark(&self) -> SequenceNumber {
        self.sequences.lock().stable()
    }

    /// Captures the stable watermark and pins it against compaction.
    ///
    /// A pin with a deadline stops protecting its versions once the
    /// deadline passes, whether or not it is released.
    pub(crate) fn pin(&self, expires_at: Option<Instant>) -> PinTicket {
        let mut state = self.sequences.lock();
        let watermark = state.stable();
        let id = state.next_pin;
        state.next_pin += 1;
        state.pins.insert(
            id,
            PinEntry {
                watermark: watermark.as_u64(),
                expires_at,
            },
        );
        PinTicket { id, watermark }
    }

    /// Moves the deadline of a pin that is still held.
    pub(crate) fn extend_pin(&self, ticket: PinTicket, expires_at: Option<Instant>) {
        if let Some(entry) = self.sequences.lock().pins.get_mut(&ticket.id) {
            entry.expires_at = expires_at;
        }
    }

    /// Releases a pin taken by [`Ledger::pin`].
    pub(crate) fn unpin(&self, ticket: PinTicket) {
        self.sequences.lock().pins.remove(&ticket.id);
    }

    /// Number of outstanding pins, expired ones included.
    pub(crate) fn pin_count(&self) -> usize {
        self.sequences.lock().pins.len()
    }

    /// Oldest watermark any reader can still use. Expired pins are ignored.
    fn horizon(&self) -> SequenceNumber {
        let now = Instant::now();
        let state = self.sequences.lock();
        state
            .pins
            .values()
            .filter(|pin| pin.holds_at(now))
            .map(|pin| SequenceNumber::new(pin.watermark))
            .min()
            .unwrap_or_else(|| state.stable())
    }

    #[cfg(test)]
    pub(crate) fn version_count(&self, key: &str) -> usize {
        self.slot(key).map_or(0, |s| s.versions.read().len())
    }

    /// Highest revision this ledger has minted or accepted.
    pub(crate) fn high_water_revision(&self) -> Revision {
        self.clock.current()
    }
}
