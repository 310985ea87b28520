//! Tree comparison.

use super::{bucket_range, pow, RevisionTree, TreeNode};
use crate::error::{CoreError, CoreResult};
use crate::types::RevisionRange;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Aggregated nodes of one level, keyed by absolute group index.
type Level = BTreeMap<u128, TreeNode>;

/// Returns the revision ranges in which two trees differ.
///
/// Both trees are first brought to the wider of their two leaf widths.
/// The comparison then starts at the level where all buckets share one
/// ancestor and only descends into groups whose count or hash differ.
/// Adjacent differing leaves are merged, so the result is sorted and
/// disjoint.
///
/// # Errors
///
/// Returns `InvalidArgument` if the branch factors differ.
pub fn diff(left: &RevisionTree, right: &RevisionTree) -> CoreResult<Vec<RevisionRange>> {
    let branch = left.branch_factor();
    if branch != right.branch_factor() {
        return Err(CoreError::invalid_argument(format!(
            "branch factors differ: {branch} vs {}",
            right.branch_factor()
        )));
    }

    let exponent = left
        .header()
        .width_exponent
        .max(right.header().width_exponent);
    let width = pow(branch, exponent);
    let branch = u128::from(branch);

    let mut a = vec![left.buckets_at(exponent)];
    let mut b = vec![right.buckets_at(exponent)];
    let roots = loop {
        let (la, lb) = (&a[a.len() - 1], &b[b.len() - 1]);
        let union: BTreeSet<u128> = la.keys().chain(lb.keys()).copied().collect();
        if union.len() <= 1 {
            break union;
        }
        let (pa, pb) = (parent(la, branch), parent(lb, branch));
        a.push(pa);
        b.push(pb);
    };

    let mut ranges = Vec::new();
    let walk = Walk {
        a: &a,
        b: &b,
        branch,
        width,
    };
    for root in roots {
        walk.descend(a.len() - 1, root, &mut ranges);
    }

    trace!(
        levels = a.len(),
        ranges = ranges.len(),
        "diffed revision trees"
    );
    Ok(ranges)
}

fn parent(level: &Level, branch: u128) -> Level {
    let mut out = Level::new();
    for (index, node) in level {
        out.entry(index / branch).or_default().merge(*node);
    }
    out
}

struct Walk<'a> {
    a: &'a [Level],
    b: &'a [Level],
    branch: u128,
    width: u128,
}

impl Walk<'_> {
    fn descend(&self, height: usize, group: u128, out: &mut Vec<RevisionRange>) {
        let left = self.a[height].get(&group).copied().unwrap_or_default();
        let right = self.b[height].get(&group).copied().unwrap_or_default();
        if left == right {
            return;
        }

        if height == 0 {
            let start = group.checked_mul(self.width);
            if let Some(range) = start.and_then(|start| bucket_range(start, self.width)) {
                push_merged(out, range);
            }
            return;
        }

        let low = group * self.branch;
        let high = low.saturating_add(self.branch);
        let children: BTreeSet<u128> = self.a[height - 1]
            .range(low..high)
            .chain(self.b[height - 1].range(low..high))
            .map(|(index, _)| *index)
            .collect();
        for child in children {
            self.descend(height - 1, child, out);
        }
    }
}

fn push_merged(out: &mut Vec<RevisionRange>, range: RevisionRange) {
    if let Some(last) = out.last_mut() {
        if last.max.checked_next() == Some(range.min) {
            last.max = range.max;
            return;
        }
    }
    out.push(range);
}
