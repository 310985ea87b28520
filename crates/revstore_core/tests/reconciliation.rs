//! Integration tests for snapshots, revision trees, diff and range paging.

use proptest::prelude::*;
use revstore_core::{
    diff, BatchId, CollectionOptions, Config, Database, ErrorKind, Revision, RevisionRange,
    ReplicationVersion, Value,
};
use std::collections::BTreeSet;
use std::time::Duration;

fn body(n: i64) -> Value {
    Value::object([("n", Value::from(n))])
}

fn populated(config: Config, count: i64) -> Database {
    let db = Database::open(config).unwrap();
    db.create_collection("docs", CollectionOptions::new()).unwrap();
    for i in 0..count {
        db.put("docs", &format!("k{i}"), body(i), None).unwrap();
    }
    db
}

/// Copies every live document of `from` into `to`, keeping revisions.
fn mirror(from: &Database, to: &Database) {
    let batch = from.create_snapshot("docs", None).unwrap();
    let mut resume = None;
    let target = to.collection("docs").unwrap();
    loop {
        let page = from
            .revisions_in_ranges(batch, &[RevisionRange::full()], resume)
            .unwrap();
        for doc in from
            .documents_for_revisions(batch, &page.revisions)
            .unwrap()
            .into_iter()
            .flatten()
        {
            target.apply_replicated(doc).unwrap();
        }
        resume = page.next_resume;
        if resume.is_none() {
            break;
        }
    }
    from.delete_snapshot(batch).unwrap();
}

#[test]
fn small_collection_tree_has_one_level() {
    let db = populated(Config::default().branch_factor(8), 3);
    let batch = db.create_snapshot("docs", None).unwrap();
    let tree = db.build_tree(batch).unwrap();
    assert!(tree.max_depth() <= 1);
    assert_eq!(tree.count(), 3);
    assert_eq!(tree.branch_factor(), 8);
}

#[test]
fn tree_is_deterministic_and_complete() {
    let db = populated(Config::default().leaf_granularity(4), 300);
    let batch = db.create_snapshot("docs", None).unwrap();
    for i in 0..50 {
        db.put("docs", &format!("k{i}"), body(-i), None).unwrap();
    }

    let first = db.build_tree(batch).unwrap();
    let second = db.build_tree(batch).unwrap();
    assert_eq!(first.range_min(), second.range_min());
    assert_eq!(first.range_max(), second.range_max());
    assert_eq!(first.max_depth(), second.max_depth());
    assert_eq!(first.nodes(), second.nodes());

    let leaves: u64 = first.nodes().iter().map(|n| n.count).sum();
    assert_eq!(leaves, first.count());
    assert_eq!(first.count(), 300);
    assert_eq!(db.stats("docs").unwrap().trees_built, 2);
}

#[test]
fn mirrored_replicas_have_no_differences() {
    let leader = populated(Config::default(), 120);
    let follower = populated(Config::default(), 0);
    mirror(&leader, &follower);

    let a = leader.create_snapshot("docs", None).unwrap();
    let b = follower.create_snapshot("docs", None).unwrap();
    let left = leader.build_tree(a).unwrap();
    let right = follower.build_tree(b).unwrap();
    assert_eq!(left.root_hash(), right.root_hash());
    assert!(diff(&left, &right).unwrap().is_empty());
}

/// A revision present on one side only is found in a single leaf range.
#[test]
fn one_extra_revision_yields_one_range() {
    let leader = populated(Config::default(), 120);
    let follower = populated(Config::default(), 0);
    mirror(&leader, &follower);
    let extra = leader.put("docs", "extra", body(0), None).unwrap().revision;

    let a = leader.create_snapshot("docs", None).unwrap();
    let b = follower.create_snapshot("docs", None).unwrap();
    let ranges = diff(
        &leader.build_tree(a).unwrap(),
        &follower.build_tree(b).unwrap(),
    )
    .unwrap();
    assert_eq!(ranges.len(), 1);
    assert!(ranges[0].contains(extra));

    let page = leader.revisions_in_ranges(a, &ranges, None).unwrap();
    assert_eq!(page.revisions, vec![extra]);
}

/// Updating a mirrored document retires one revision and adds another, so
/// the two sides differ in up to two leaf ranges.
#[test]
fn updated_document_differs_in_at_most_two_ranges() {
    let leader = populated(Config::default(), 200);
    let follower = populated(Config::default(), 0);
    mirror(&leader, &follower);
    let old = leader.get("docs", "k3").unwrap().revision();
    let new = leader.put("docs", "k3", body(-3), None).unwrap().revision;

    let a = leader.create_snapshot("docs", None).unwrap();
    let b = follower.create_snapshot("docs", None).unwrap();
    let ranges = diff(
        &leader.build_tree(a).unwrap(),
        &follower.build_tree(b).unwrap(),
    )
    .unwrap();
    assert!((1..=2).contains(&ranges.len()));
    assert!(ranges.iter().any(|r| r.contains(old)));
    assert!(ranges.iter().any(|r| r.contains(new)));

    let leader_page = leader.revisions_in_ranges(a, &ranges, None).unwrap();
    let follower_page = follower.revisions_in_ranges(b, &ranges, None).unwrap();
    let leader_revs: BTreeSet<Revision> = leader_page.revisions.into_iter().collect();
    let follower_revs: BTreeSet<Revision> = follower_page.revisions.into_iter().collect();
    let differing: Vec<Revision> = leader_revs
        .symmetric_difference(&follower_revs)
        .copied()
        .collect();
    assert_eq!(differing, vec![old, new]);
}

#[test]
fn mismatched_branch_factors_are_rejected() {
    let left = populated(Config::default().branch_factor(4), 10);
    let right = populated(Config::default().branch_factor(8), 10);
    let a = left.create_snapshot("docs", None).unwrap();
    let b = right.create_snapshot("docs", None).unwrap();
    let err = diff(&left.build_tree(a).unwrap(), &right.build_tree(b).unwrap()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn expired_snapshot_fails_derived_calls() {
    let db = populated(Config::default(), 5);
    let batch = db
        .create_snapshot("docs", Some(Duration::from_millis(20)))
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(db.build_tree(batch).unwrap_err().is_not_found());
    assert!(db
        .revisions_in_ranges(batch, &[RevisionRange::full()], None)
        .unwrap_err()
        .is_not_found());
    assert!(db
        .documents_for_revisions(batch, &[Revision::new(1)])
        .unwrap_err()
        .is_not_found());
}

#[test]
fn legacy_collections_cannot_replicate_by_tree() {
    let db = Database::open_in_memory().unwrap();
    db.create_collection(
        "old",
        CollectionOptions::new().replication(ReplicationVersion::Legacy),
    )
    .unwrap();
    let batch = db.create_snapshot("old", None).unwrap();
    assert_eq!(
        db.build_tree(batch).unwrap_err().kind(),
        ErrorKind::Unimplemented
    );
}

#[test]
fn oversized_document_requests_are_rejected() {
    let db = populated(Config::default().document_page_size(2), 3);
    let batch = db.create_snapshot("docs", None).unwrap();
    let revisions = vec![Revision::new(1); 3];
    assert_eq!(
        db.documents_for_revisions(batch, &revisions)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
}

fn drain(
    db: &Database,
    batch: BatchId,
    ranges: &[RevisionRange],
    limit: usize,
) -> Vec<Revision> {
    let mut all = Vec::new();
    let mut resume = None;
    loop {
        let page = db.revisions_in_ranges(batch, ranges, resume).unwrap();
        assert!(page.revisions.len() <= limit);
        all.extend(page.revisions);
        resume = page.next_resume;
        if resume.is_none() {
            return all;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn paging_yields_every_revision_once(
        count in 0i64..80,
        page_size in 1usize..17,
        cut in 0usize..80,
    ) {
        let db = populated(Config::default().range_page_size(page_size), count);
        let batch = db.create_snapshot("docs", None).unwrap();
        let everything = drain(&db, batch, &[RevisionRange::full()], page_size);
        prop_assert_eq!(everything.len(), count as usize);

        // Two disjoint ranges split at an arbitrary revision.
        let ranges = match everything.get(cut) {
            Some(&split) if split > Revision::MIN => vec![
                RevisionRange::new(Revision::MIN, Revision::new(split.as_u64() - 1)),
                RevisionRange::new(split, Revision::MAX),
            ],
            _ => vec![RevisionRange::full()],
        };
        let paged = drain(&db, batch, &ranges, page_size);

        let unique: BTreeSet<Revision> = paged.iter().copied().collect();
        prop_assert_eq!(unique.len(), paged.len());
        prop_assert!(paged.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(paged, everything);
    }
}
