//! Snapshot lifecycle requests.

use crate::fields::{decode_map, int};
use revstore_codec::{to_cbor, CodecResult, Decode, Encode, Value};
use revstore_core::BatchId;
use std::time::Duration;

/// Asks a replica to snapshot one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSnapshotRequest {
    /// Collection to snapshot.
    pub collection: String,
    /// Requested TTL; the replica default applies when absent.
    pub ttl: Option<Duration>,
}

impl Encode for CreateSnapshotRequest {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut pairs = vec![("collection", Value::from(self.collection.as_str()))];
        if let Some(ttl) = self.ttl {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            pairs.push(("ttl_ms", int(millis)));
        }
        to_cbor(&Value::object(pairs))
    }
}

impl Decode for CreateSnapshotRequest {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            Ok(Self {
                collection: f.text("collection")?.to_string(),
                ttl: f.opt_u64("ttl_ms")?.map(Duration::from_millis),
            })
        })
    }
}

/// Id of a created snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSnapshotResponse {
    /// The new batch id.
    pub batch_id: BatchId,
}

impl Encode for CreateSnapshotResponse {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(&Value::object([("batch_id", int(self.batch_id.as_u64()))]))
    }
}

impl Decode for CreateSnapshotResponse {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            Ok(Self {
                batch_id: BatchId::new(f.u64("batch_id")?),
            })
        })
    }
}

/// Releases a snapshot early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSnapshotRequest {
    /// Snapshot to release.
    pub batch_id: BatchId,
}

impl Encode for DeleteSnapshotRequest {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(&Value::object([("batch_id", int(self.batch_id.as_u64()))]))
    }
}

impl Decode for DeleteSnapshotRequest {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            Ok(Self {
                batch_id: BatchId::new(f.u64("batch_id")?),
            })
        })
    }
}
