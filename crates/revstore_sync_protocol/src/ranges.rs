//! Revision range paging.

use crate::fields::{decode_map, int, u64_list};
use revstore_codec::{to_cbor, CodecError, CodecResult, Decode, Encode, Value};
use revstore_core::{BatchId, Revision, RevisionPage, RevisionRange};

/// Asks for one page of snapshot revisions within `ranges`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangesRequest {
    /// Snapshot to page through.
    pub batch_id: BatchId,
    /// Inclusive, sorted, non-overlapping ranges.
    pub ranges: Vec<RevisionRange>,
    /// First revision not yet returned; `None` starts from the beginning.
    pub resume: Option<Revision>,
}

impl Encode for RangesRequest {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let ranges = self
            .ranges
            .iter()
            .map(|r| Value::Array(vec![int(r.min.as_u64()), int(r.max.as_u64())]))
            .collect();
        let mut pairs = vec![
            ("batch_id", int(self.batch_id.as_u64())),
            ("ranges", Value::Array(ranges)),
        ];
        if let Some(resume) = self.resume {
            pairs.push(("resume", int(resume.as_u64())));
        }
        to_cbor(&Value::object(pairs))
    }
}

impl Decode for RangesRequest {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            let ranges = f
                .array("ranges")?
                .iter()
                .map(|range| {
                    let bounds = range
                        .as_array()
                        .ok_or_else(|| CodecError::invalid_structure("range must be an array"))?;
                    match u64_list("range", bounds)?.as_slice() {
                        [min, max] => Ok(RevisionRange::new(Revision::new(*min), Revision::new(*max))),
                        _ => Err(CodecError::invalid_structure("range must be a [min, max] pair")),
                    }
                })
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Self {
                batch_id: BatchId::new(f.u64("batch_id")?),
                ranges,
                resume: f.opt_u64("resume")?.map(Revision::new),
            })
        })
    }
}

/// One page of revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangesResponse {
    /// Revisions in ascending order.
    pub revisions: Vec<Revision>,
    /// Resume token for the next page, absent when exhausted.
    pub next_resume: Option<Revision>,
}

impl From<RevisionPage> for RangesResponse {
    fn from(page: RevisionPage) -> Self {
        Self {
            revisions: page.revisions,
            next_resume: page.next_resume,
        }
    }
}

impl From<RangesResponse> for RevisionPage {
    fn from(response: RangesResponse) -> Self {
        RevisionPage {
            revisions: response.revisions,
            next_resume: response.next_resume,
        }
    }
}

impl Encode for RangesResponse {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let revisions = self.revisions.iter().map(|r| int(r.as_u64())).collect();
        let mut pairs = vec![("revisions", Value::Array(revisions))];
        if let Some(next) = self.next_resume {
            pairs.push(("next_resume", int(next.as_u64())));
        }
        to_cbor(&Value::object(pairs))
    }
}

impl Decode for RangesResponse {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            Ok(Self {
                revisions: u64_list("revisions", f.array("revisions")?)?
                    .into_iter()
                    .map(Revision::new)
                    .collect(),
                next_resume: f.opt_u64("next_resume")?.map(Revision::new),
            })
        })
    }
}
