//! Durability hook for `wait_for_sync`.

use crate::error::CoreResult;
use crate::types::Revision;
use std::fmt;

/// Flush primitive invoked when a mutation asks to wait for sync.
///
/// The ledger itself is in memory; an embedding that persists it plugs a
/// real flush in here.
pub trait Durability: Send + Sync + fmt::Debug {
    /// Blocks until every mutation of `collection` up to `revision` is
    /// durable.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Durability` if the flush fails.
    fn sync(&self, collection: &str, revision: Revision) -> CoreResult<()>;
}

/// Durability that acknowledges immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDurability;

impl Durability for NoopDurability {
    fn sync(&self, _collection: &str, _revision: Revision) -> CoreResult<()> {
        Ok(())
    }
}
