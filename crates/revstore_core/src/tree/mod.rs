//! Revision trees.
//!
//! A [`RevisionTree`] summarises the revisions of a snapshot as a flat
//! array of leaves. Each leaf covers a fixed-width bucket of the revision
//! space and stores the number of revisions in it plus a combined hash.
//!
//! ## Bucketing
//!
//! Buckets are laid on a grid aligned to the leaf width:
//!
//! - `leaf_width = branch_factor ^ width_exponent`
//! - `origin = range_min - range_min % leaf_width`
//! - leaf `i` covers `[origin + i * leaf_width, origin + (i + 1) * leaf_width)`
//!
//! The tree picks the smallest exponent whose `branch_factor ^ max_depth`
//! leaves reach `range_max`. Because the grid only depends on the width,
//! two trees can always be brought to a common width by merging leaves,
//! which is what [`diff`] does before comparing them.
//!
//! ## Hashing
//!
//! A leaf hash is the XOR of a 64-bit digest of every revision in the
//! bucket. XOR makes the hash independent of insertion order and lets
//! parents and coarsened leaves be computed from their children alone.

mod diff;

pub use diff::diff;

use crate::error::{CoreError, CoreResult};
use crate::types::{Revision, RevisionRange};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Format version of trees produced by this crate.
pub const TREE_VERSION: u32 = 1;

/// Count and hash of one leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TreeNode {
    /// Number of revisions in the bucket.
    pub count: u64,
    /// XOR of the revision digests in the bucket.
    pub hash: u64,
}

impl TreeNode {
    /// Adds a revision to this node.
    pub fn insert(&mut self, revision: Revision) {
        self.count += 1;
        self.hash ^= revision_digest(revision);
    }

    /// Folds another node into this one.
    pub fn merge(&mut self, other: TreeNode) {
        self.count += other.count;
        self.hash ^= other.hash;
    }

    /// Returns true if no revision fell into the bucket.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// 64-bit digest of a revision: the first eight bytes of SHA-256 over its
/// little-endian encoding.
pub fn revision_digest(revision: Revision) -> u64 {
    let digest = Sha256::digest(revision.as_u64().to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Everything in a tree except its leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    /// Format version.
    pub version: u32,
    /// Children per internal node.
    pub branch_factor: u32,
    /// Tree depth; there are `branch_factor ^ max_depth` leaves.
    pub max_depth: u32,
    /// Lowest revision present.
    pub range_min: Revision,
    /// Highest revision present.
    pub range_max: Revision,
    /// Grid origin when the tree was built.
    pub initial_range_min: Revision,
    /// Start of the first leaf.
    pub origin: Revision,
    /// Leaf width is `branch_factor ^ width_exponent`.
    pub width_exponent: u32,
    /// Number of revisions.
    pub count: u64,
}

/// Leaf array over the revisions of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionTree {
    header: TreeHeader,
    nodes: Vec<TreeNode>,
}

/// Number of distinct revisions.
const REVISION_SPACE: u128 = 1 << 64;

fn pow(base: u32, exponent: u32) -> u128 {
    u128::from(base).saturating_pow(exponent)
}

/// Leaf width for `exponent`, rejecting widths no build can produce.
fn leaf_width(branch_factor: u32, exponent: u32) -> CoreResult<u128> {
    let width = pow(branch_factor, exponent);
    // The next narrower width must still fall short of the whole space.
    if width / u128::from(branch_factor) >= REVISION_SPACE {
        return Err(CoreError::invalid_argument(format!(
            "leaf width {branch_factor}^{exponent} exceeds the revision space"
        )));
    }
    Ok(width)
}

impl RevisionTree {
    /// Builds a tree over `revisions`.
    ///
    /// The order of `revisions` does not matter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a branch factor below 2 or a zero leaf
    /// granularity.
    pub fn build(
        revisions: &[Revision],
        branch_factor: u32,
        leaf_granularity: usize,
    ) -> CoreResult<Self> {
        if branch_factor < 2 {
            return Err(CoreError::invalid_argument("branch factor must be at least 2"));
        }
        if leaf_granularity == 0 {
            return Err(CoreError::invalid_argument("leaf granularity must be > 0"));
        }

        let (Some(&min), Some(&max)) = (revisions.iter().min(), revisions.iter().max()) else {
            return Ok(Self::empty(branch_factor));
        };

        let wanted = revisions.len().div_ceil(leaf_granularity) as u128;
        let mut max_depth = 0;
        while pow(branch_factor, max_depth) < wanted {
            max_depth += 1;
        }
        let leaves = pow(branch_factor, max_depth);

        let low = u128::from(min.as_u64());
        let high = u128::from(max.as_u64());
        let mut width_exponent = 0;
        let origin = loop {
            let width = pow(branch_factor, width_exponent);
            let origin = low - low % width;
            if origin.saturating_add(leaves.saturating_mul(width)) > high {
                break origin;
            }
            width_exponent += 1;
        };

        let origin = Revision::new(origin as u64);
        let leaf_count = usize::try_from(leaves)
            .map_err(|_| CoreError::invalid_argument("too many tree leaves"))?;
        let header = TreeHeader {
            version: TREE_VERSION,
            branch_factor,
            max_depth,
            range_min: min,
            range_max: max,
            initial_range_min: origin,
            origin,
            width_exponent,
            count: revisions.len() as u64,
        };
        let mut tree = Self {
            header,
            nodes: vec![TreeNode::default(); leaf_count],
        };
        for &revision in revisions {
            let leaf = tree.leaf_of(revision);
            tree.nodes[leaf].insert(revision);
        }
        Ok(tree)
    }

    fn empty(branch_factor: u32) -> Self {
        Self {
            header: TreeHeader {
                version: TREE_VERSION,
                branch_factor,
                max_depth: 0,
                range_min: Revision::MIN,
                range_max: Revision::MIN,
                initial_range_min: Revision::MIN,
                origin: Revision::MIN,
                width_exponent: 0,
                count: 0,
            },
            nodes: vec![TreeNode::default()],
        }
    }

    /// Reassembles a tree from its parts, checking their consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the leaf count, counts, or alignment
    /// do not match the header, or the leaf width is out of range.
    pub fn from_parts(header: TreeHeader, nodes: Vec<TreeNode>) -> CoreResult<Self> {
        if header.branch_factor < 2 {
            return Err(CoreError::invalid_argument("branch factor must be at least 2"));
        }
        let expected = pow(header.branch_factor, header.max_depth);
        if nodes.len() as u128 != expected {
            return Err(CoreError::invalid_argument(format!(
                "expected {expected} leaves, got {}",
                nodes.len()
            )));
        }
        let total = nodes
            .iter()
            .try_fold(0u64, |acc, n| acc.checked_add(n.count))
            .ok_or_else(|| CoreError::invalid_argument("leaf counts overflow"))?;
        if total != header.count {
            return Err(CoreError::invalid_argument(format!(
                "leaf counts sum to {total}, header says {}",
                header.count
            )));
        }
        let width = leaf_width(header.branch_factor, header.width_exponent)?;
        if u128::from(header.origin.as_u64()) % width != 0 {
            return Err(CoreError::invalid_argument("origin is not aligned to the leaf width"));
        }
        Ok(Self { header, nodes })
    }

    /// Returns the header.
    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    /// Format version.
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Children per internal node.
    pub fn branch_factor(&self) -> u32 {
        self.header.branch_factor
    }

    /// Depth of the tree.
    pub fn max_depth(&self) -> u32 {
        self.header.max_depth
    }

    /// Lowest revision present.
    pub fn range_min(&self) -> Revision {
        self.header.range_min
    }

    /// Highest revision present.
    pub fn range_max(&self) -> Revision {
        self.header.range_max
    }

    /// Grid origin at build time.
    pub fn initial_range_min(&self) -> Revision {
        self.header.initial_range_min
    }

    /// Number of revisions.
    pub fn count(&self) -> u64 {
        self.header.count
    }

    /// Width of one leaf.
    pub fn leaf_width(&self) -> u128 {
        pow(self.header.branch_factor, self.header.width_exponent)
    }

    /// Leaf array.
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// XOR of every leaf hash.
    pub fn root_hash(&self) -> u64 {
        self.nodes.iter().fold(0, |acc, n| acc ^ n.hash)
    }

    /// Returns true if the grid moved away from where it was built.
    pub fn has_drifted(&self) -> bool {
        self.header.origin != self.header.initial_range_min
    }

    /// Inclusive revision range covered by leaf `index`.
    pub fn leaf_range(&self, index: usize) -> Option<RevisionRange> {
        if index >= self.nodes.len() {
            return None;
        }
        let width = self.leaf_width();
        let start = (index as u128)
            .checked_mul(width)?
            .checked_add(u128::from(self.header.origin.as_u64()))?;
        bucket_range(start, width)
    }

    fn leaf_of(&self, revision: Revision) -> usize {
        let offset = u128::from(revision.as_u64() - self.header.origin.as_u64());
        (offset / self.leaf_width()) as usize
    }

    /// Non-empty leaves keyed by absolute bucket index at the width
    /// `branch_factor ^ exponent`.
    ///
    /// `exponent` must not be below the tree's own width exponent.
    pub(crate) fn buckets_at(&self, exponent: u32) -> BTreeMap<u128, TreeNode> {
        let width = self.leaf_width();
        let factor = pow(self.header.branch_factor, exponent - self.header.width_exponent);
        let first = u128::from(self.header.origin.as_u64()) / width;

        let mut buckets: BTreeMap<u128, TreeNode> = BTreeMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_empty() {
                continue;
            }
            let bucket = (first + i as u128) / factor;
            buckets.entry(bucket).or_default().merge(*node);
        }
        buckets
    }

    /// Returns this tree with leaves merged to width
    /// `branch_factor ^ exponent`.
    ///
    /// The depth is unchanged; the grid origin moves down to the wider
    /// alignment, which [`RevisionTree::has_drifted`] then reports.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `exponent` is below the current width
    /// exponent or makes a leaf wider than the revision space.
    pub fn coarsen(&self, exponent: u32) -> CoreResult<Self> {
        if exponent < self.header.width_exponent {
            return Err(CoreError::invalid_argument(format!(
                "cannot refine a tree from width exponent {} to {exponent}",
                self.header.width_exponent
            )));
        }
        if exponent == self.header.width_exponent {
            return Ok(self.clone());
        }

        let width = leaf_width(self.header.branch_factor, exponent)?;
        let origin = u128::from(self.header.origin.as_u64());
        let new_origin = origin - origin % width;
        let first = new_origin / width;

        let mut nodes = vec![TreeNode::default(); self.nodes.len()];
        for (bucket, node) in self.buckets_at(exponent) {
            let index = usize::try_from(bucket - first)
                .ok()
                .filter(|i| *i < nodes.len())
                .ok_or_else(|| CoreError::internal("coarsened bucket outside the tree"))?;
            nodes[index].merge(node);
        }

        Ok(Self {
            header: TreeHeader {
                origin: Revision::new(new_origin as u64),
                width_exponent: exponent,
                ..self.header
            },
            nodes,
        })
    }
}

pub(crate) fn bucket_range(start: u128, width: u128) -> Option<RevisionRange> {
    let min = u64::try_from(start).ok()?;
    let max = start
        .checked_add(width - 1)
        .and_then(|end| u64::try_from(end).ok())
        .unwrap_or(u64::MAX);
    Some(RevisionRange::new(Revision::new(min), Revision::new(max)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn revs(values: &[u64]) -> Vec<Revision> {
        values.iter().copied().map(Revision::new).collect()
    }

    #[test]
    fn empty_tree() {
        let tree = RevisionTree::build(&[], 8, 8).unwrap();
        assert_eq!(tree.max_depth(), 0);
        assert_eq!(tree.count(), 0);
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.root_hash(), 0);
    }

    #[test]
    fn three_documents_fit_one_leaf() {
        let base = 1_700_000_000_000_000;
        let tree = RevisionTree::build(&revs(&[base, base + 5, base + 9]), 8, 8).unwrap();
        assert!(tree.max_depth() <= 1);
        assert_eq!(tree.count(), 3);
        assert_eq!(tree.nodes().iter().map(|n| n.count).sum::<u64>(), 3);
        assert_eq!(tree.range_min(), Revision::new(base));
        assert_eq!(tree.range_max(), Revision::new(base + 9));
    }

    #[test]
    fn depth_follows_count() {
        let values: Vec<u64> = (0..100).map(|i| 1000 + i * 3).collect();
        let tree = RevisionTree::build(&revs(&values), 8, 8).unwrap();
        // ceil(100 / 8) = 13 leaves wanted, 8^2 = 64 >= 13
        assert_eq!(tree.max_depth(), 2);
        assert_eq!(tree.nodes().len(), 64);
    }

    #[test]
    fn leaves_cover_range_contiguously() {
        let values: Vec<u64> = (0..50).map(|i| 77 + i * i).collect();
        let tree = RevisionTree::build(&revs(&values), 4, 2).unwrap();
        let first = tree.leaf_range(0).unwrap();
        assert!(first.min <= tree.range_min());
        let last = tree.leaf_range(tree.nodes().len() - 1).unwrap();
        assert!(last.max >= tree.range_max());
        for i in 1..tree.nodes().len() {
            let prev = tree.leaf_range(i - 1).unwrap();
            let next = tree.leaf_range(i).unwrap();
            assert_eq!(prev.max.as_u64() + 1, next.min.as_u64());
        }
        assert!(tree.leaf_range(tree.nodes().len()).is_none());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(RevisionTree::build(&revs(&[1]), 1, 8).is_err());
        assert!(RevisionTree::build(&revs(&[1]), 8, 0).is_err());
    }

    #[test]
    fn from_parts_checks_consistency() {
        let tree = RevisionTree::build(&revs(&[10, 20, 30]), 8, 1).unwrap();
        let rebuilt = RevisionTree::from_parts(*tree.header(), tree.nodes().to_vec()).unwrap();
        assert_eq!(rebuilt, tree);

        let mut short = tree.nodes().to_vec();
        short.pop();
        assert!(RevisionTree::from_parts(*tree.header(), short).is_err());

        let mut header = *tree.header();
        header.count += 1;
        assert!(RevisionTree::from_parts(header, tree.nodes().to_vec()).is_err());
    }

    #[test]
    fn from_parts_rejects_overflowing_input() {
        let mut header = *RevisionTree::build(&[], 2, 1).unwrap().header();
        header.max_depth = 1;
        header.count = 5;
        let nodes = vec![
            TreeNode { count: u64::MAX, hash: 0 },
            TreeNode { count: 5, hash: 0 },
        ];
        let err = RevisionTree::from_parts(header, nodes).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);

        let mut header = *RevisionTree::build(&[], 3, 1).unwrap().header();
        header.width_exponent = 200;
        assert!(RevisionTree::from_parts(header, vec![TreeNode::default()]).is_err());
        header.width_exponent = 41;
        let tree = RevisionTree::from_parts(header, vec![TreeNode::default()]).unwrap();
        assert_eq!(tree.leaf_range(0).unwrap().max, Revision::MAX);
        assert!(tree.coarsen(42).is_err());
    }

    #[test]
    fn coarsen_keeps_totals() {
        let values: Vec<u64> = (0..40).map(|i| 5000 + i * 7).collect();
        let tree = RevisionTree::build(&revs(&values), 8, 4).unwrap();
        let exponent = tree.header().width_exponent + 1;
        let coarse = tree.coarsen(exponent).unwrap();
        assert_eq!(coarse.count(), tree.count());
        assert_eq!(coarse.root_hash(), tree.root_hash());
        assert_eq!(coarse.nodes().iter().map(|n| n.count).sum::<u64>(), 40);
        assert_eq!(coarse.initial_range_min(), tree.initial_range_min());
        assert!(tree.coarsen(exponent - 1).is_ok());
        assert!(coarse.coarsen(exponent - 1).is_err());
    }

    proptest! {
        #[test]
        fn build_is_deterministic_and_complete(
            values in prop::collection::btree_set(0u64..1_000_000, 0..300),
            branch in 2u32..10,
            granularity in 1usize..16,
        ) {
            let mut revisions = revs(&values.into_iter().collect::<Vec<_>>());
            let a = RevisionTree::build(&revisions, branch, granularity).unwrap();
            revisions.reverse();
            let b = RevisionTree::build(&revisions, branch, granularity).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.nodes().iter().map(|n| n.count).sum::<u64>(), a.count());
            prop_assert_eq!(a.count(), revisions.len() as u64);
            prop_assert_eq!(a.nodes().len() as u128, u128::from(branch).pow(a.max_depth()));
        }
    }
}
