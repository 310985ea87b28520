//! Version compaction.
//!
//! Compaction drops versions that no reader can observe any more:
//!
//! - The horizon is the oldest watermark held by an unexpired pin, or the
//!   stable watermark when nothing holds one.
//! - Per key, the newest version at or below the horizon is kept along
//!   with everything newer. Older versions are dropped.
//! - If that base version is a tombstone it is dropped as well; a key left
//!   without versions is retired from the index.
//!
//! Compaction never changes what the live ledger or a pinned snapshot
//! returns. Keys whose writer is busy are skipped and picked up by a later
//! pass.

use super::{KeySlot, Ledger};
use std::sync::Arc;
use tracing::debug;

/// Result of a compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Superseded live versions removed.
    pub versions_removed: usize,
    /// Tombstones removed.
    pub tombstones_removed: usize,
    /// Keys removed from the index entirely.
    pub keys_retired: usize,
    /// Keys skipped because a writer held them.
    pub keys_skipped: usize,
}

impl Ledger {
    /// Runs one compaction pass over every key.
    pub(crate) fn compact(&self) -> CompactionResult {
        let horizon = self.horizon();
        let mut result = CompactionResult::default();

        for shard in self.shards.iter() {
            let slots: Vec<(String, Arc<KeySlot>)> = shard
                .read()
                .iter()
                .map(|(k, s)| (k.clone(), Arc::clone(s)))
                .collect();

            for (key, slot) in slots {
                let Some(mut retired) = slot.writer.try_lock() else {
                    result.keys_skipped += 1;
                    continue;
                };
                if *retired {
                    continue;
                }

                let mut versions = slot.versions.write();
                let Some(base) = versions.iter().rposition(|v| v.seq <= horizon) else {
                    continue;
                };
                let cut = if versions[base].doc.is_deleted() {
                    base + 1
                } else {
                    base
                };
                for version in versions.drain(..cut) {
                    if version.doc.is_deleted() {
                        result.tombstones_removed += 1;
                    } else {
                        result.versions_removed += 1;
                    }
                }

                if versions.is_empty() {
                    *retired = true;
                    drop(versions);
                    let mut index = shard.write();
                    if index.get(&key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                        index.remove(&key);
                        result.keys_retired += 1;
                    }
                }
            }
        }

        debug!(
            horizon = horizon.as_u64(),
            versions_removed = result.versions_removed,
            tombstones_removed = result.tombstones_removed,
            keys_retired = result.keys_retired,
            "compacted ledger"
        );
        result
    }
}
