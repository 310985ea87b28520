//! Per-collection revision clock.

use crate::types::Revision;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Mints revisions for one collection.
///
/// Revisions follow wall-clock microseconds but never go backwards: each
/// tick is strictly greater than every revision previously minted or
/// observed by this clock.
#[derive(Debug, Default)]
pub(crate) struct RevisionClock {
    last: AtomicU64,
}

impl RevisionClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mints a revision greater than `floor` and every earlier tick.
    pub(crate) fn tick_after(&self, floor: Option<Revision>) -> Revision {
        let now = now_micros();
        let floor = floor.map_or(0, Revision::as_u64);
        let next = |last: u64| last.max(floor).saturating_add(1).max(now);
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
            .unwrap_or_else(|last| last);
        Revision::new(next(previous))
    }

    /// Advances the clock past a revision minted elsewhere.
    pub(crate) fn observe(&self, revision: Revision) {
        self.last.fetch_max(revision.as_u64(), Ordering::SeqCst);
    }

    /// Highest revision minted or observed so far.
    pub(crate) fn current(&self) -> Revision {
        Revision::new(self.last.load(Ordering::SeqCst))
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}
