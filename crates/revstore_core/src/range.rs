//! Revision range paging and document lookup over a frozen view.

use crate::document::Document;
use crate::error::{CoreError, CoreResult};
use crate::ledger::Ledger;
use crate::types::{Revision, RevisionRange, SequenceNumber};

/// One page of revisions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevisionPage {
    /// Revisions in ascending order.
    pub revisions: Vec<Revision>,
    /// Where the next page starts; `None` once the ranges are exhausted.
    pub next_resume: Option<Revision>,
}

impl RevisionPage {
    /// Returns true if more pages follow.
    pub fn has_more(&self) -> bool {
        self.next_resume.is_some()
    }
}

/// Checks that ranges are well formed, sorted and disjoint.
///
/// # Errors
///
/// Returns `InvalidArgument` describing the first offending range.
pub fn validate_ranges(ranges: &[RevisionRange]) -> CoreResult<()> {
    for range in ranges {
        if !range.is_well_formed() {
            return Err(CoreError::invalid_argument(format!(
                "range {range} has min above max"
            )));
        }
    }
    for pair in ranges.windows(2) {
        if pair[0].max >= pair[1].min {
            return Err(CoreError::invalid_argument(format!(
                "ranges {} and {} are unsorted or overlapping",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

/// Live documents of a snapshot sorted by revision.
#[derive(Debug, Default)]
pub(crate) struct RevisionIndex {
    entries: Vec<Document>,
}

impl RevisionIndex {
    pub(crate) fn build(ledger: &Ledger, watermark: SequenceNumber) -> Self {
        let mut entries = Vec::new();
        ledger.for_each_visible(watermark, |doc| entries.push(doc.clone()));
        entries.sort_by(|a, b| {
            a.revision()
                .cmp(&b.revision())
                .then_with(|| a.key().cmp(b.key()))
        });
        Self { entries }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn revisions(&self) -> Vec<Revision> {
        self.entries.iter().map(Document::revision).collect()
    }

    /// Returns up to `limit` distinct revisions at or above `resume` that
    /// fall into `ranges`.
    pub(crate) fn page(
        &self,
        ranges: &[RevisionRange],
        resume: Option<Revision>,
        limit: usize,
    ) -> CoreResult<RevisionPage> {
        validate_ranges(ranges)?;
        if limit == 0 {
            return Err(CoreError::invalid_argument("page size must be > 0"));
        }

        let floor = resume.unwrap_or(Revision::MIN);
        let mut revisions: Vec<Revision> = Vec::new();
        for range in ranges.iter().filter(|r| r.max >= floor) {
            let start = range.min.max(floor);
            let first = self.entries.partition_point(|d| d.revision() < start);
            for doc in &self.entries[first..] {
                let revision = doc.revision();
                if revision > range.max {
                    break;
                }
                if revisions.last() == Some(&revision) {
                    continue;
                }
                if revisions.len() == limit {
                    let next_resume = revisions.last().and_then(|r| r.checked_next());
                    return Ok(RevisionPage {
                        revisions,
                        next_resume,
                    });
                }
                revisions.push(revision);
            }
        }

        Ok(RevisionPage {
            revisions,
            next_resume: None,
        })
    }

    pub(crate) fn lookup(&self, revision: Revision) -> Option<&Document> {
        let i = self.entries.partition_point(|d| d.revision() < revision);
        self.entries.get(i).filter(|d| d.revision() == revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Mutation;
    use revstore_codec::Value;

    fn index(revisions: &[u64]) -> RevisionIndex {
        let ledger = Ledger::new(4);
        for (i, r) in revisions.iter().enumerate() {
            let doc = Document::new(format!("k{i}"), Revision::new(*r), Value::empty_object());
            ledger
                .mutate(doc.key(), |_| Ok(Mutation::Replicate(doc.clone())))
                .unwrap();
        }
        RevisionIndex::build(&ledger, ledger.stable_watermark())
    }

    fn range(min: u64, max: u64) -> RevisionRange {
        RevisionRange::new(Revision::new(min), Revision::new(max))
    }

    fn revs(values: &[u64]) -> Vec<Revision> {
        values.iter().copied().map(Revision::new).collect()
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(validate_ranges(&[range(5, 1)]).is_err());
        assert!(validate_ranges(&[range(1, 5), range(5, 9)]).is_err());
        assert!(validate_ranges(&[range(6, 9), range(1, 5)]).is_err());
        assert!(validate_ranges(&[range(1, 5), range(6, 9)]).is_ok());
        assert!(validate_ranges(&[]).is_ok());
    }

    #[test]
    fn pages_through_ranges() {
        let index = index(&[10, 20, 30, 40, 50, 60]);
        let ranges = [range(15, 45), range(55, 100)];

        let first = index.page(&ranges, None, 2).unwrap();
        assert_eq!(first.revisions, revs(&[20, 30]));
        assert_eq!(first.next_resume, Some(Revision::new(31)));

        let second = index.page(&ranges, first.next_resume, 2).unwrap();
        assert_eq!(second.revisions, revs(&[40, 60]));
        assert_eq!(second.next_resume, None);
    }

    #[test]
    fn exact_fit_ends_without_resume() {
        let index = index(&[1, 2]);
        let page = index.page(&[RevisionRange::full()], None, 2).unwrap();
        assert_eq!(page.revisions, revs(&[1, 2]));
        assert!(!page.has_more());
    }

    #[test]
    fn resume_past_everything_is_empty() {
        let index = index(&[1, 2]);
        let page = index
            .page(&[RevisionRange::full()], Some(Revision::new(3)), 10)
            .unwrap();
        assert!(page.revisions.is_empty());
        assert_eq!(page.next_resume, None);
    }

    #[test]
    fn lookup_by_revision() {
        let index = index(&[7, 9]);
        assert_eq!(index.lookup(Revision::new(9)).unwrap().key(), "k1");
        assert!(index.lookup(Revision::new(8)).is_none());
        assert_eq!(index.len(), 2);
    }
}
