//! Core type definitions for revstore.

use std::fmt;

/// Version token attached to a document.
///
/// Revisions are minted from a per-collection clock and are strictly
/// increasing per key. They double as the sort key of the revision tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(pub u64);

impl Revision {
    /// The smallest revision.
    pub const MIN: Revision = Revision(0);
    /// The largest revision.
    pub const MAX: Revision = Revision(u64::MAX);

    /// Creates a new revision.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following revision, or `None` at the top of the range.
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Decimal form used for the `_rev` system attribute.
    #[must_use]
    pub fn to_token(self) -> String {
        self.0.to_string()
    }

    /// Parses the decimal `_rev` form.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        token.parse().ok().map(Self)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

/// Commit sequence of a ledger version.
///
/// Sequences are local to one collection and decide snapshot visibility.
/// Revisions cannot serve that purpose because replicated documents keep
/// the revision their origin minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Opaque identifier of a snapshot ("batch").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchId(pub u64);

impl BatchId {
    /// Creates a new batch id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch:{}", self.0)
    }
}

/// Inclusive range of revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevisionRange {
    /// Lowest revision in the range.
    pub min: Revision,
    /// Highest revision in the range.
    pub max: Revision,
}

impl RevisionRange {
    /// Creates a range from its inclusive bounds.
    #[must_use]
    pub const fn new(min: Revision, max: Revision) -> Self {
        Self { min, max }
    }

    /// The range covering every revision.
    #[must_use]
    pub const fn full() -> Self {
        Self::new(Revision::MIN, Revision::MAX)
    }

    /// Returns true if `min <= max`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.min <= self.max
    }

    /// Returns true if `revision` lies within the range.
    #[must_use]
    pub fn contains(&self, revision: Revision) -> bool {
        self.min <= revision && revision <= self.max
    }
}

impl fmt::Display for RevisionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min.0, self.max.0)
    }
}
