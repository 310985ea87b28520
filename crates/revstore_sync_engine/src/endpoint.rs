//! Replica endpoints.
//!
//! [`ReplicaEndpoint`] is the seam between the reconciler and a replica.
//! [`LocalEndpoint`] talks to an in-process [`Database`];
//! [`ProtocolEndpoint`] wraps another endpoint and pushes every request and
//! response through its CBOR wire form, the way a remote transport would.

use crate::error::SyncResult;
use revstore_codec::{Decode, Encode};
use revstore_core::{BatchId, Database, Document, Revision, RevisionPage, RevisionRange, RevisionTree};
use revstore_sync_protocol::{
    CreateSnapshotRequest, CreateSnapshotResponse, DeleteSnapshotRequest, DocumentsRequest,
    DocumentsResponse, RangesRequest, RangesResponse, TreeMessage, TreeRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// One side of a reconciliation.
pub trait ReplicaEndpoint: Send + Sync {
    /// Freezes the current state of `collection`.
    fn create_snapshot(&self, collection: &str, ttl: Option<Duration>) -> SyncResult<BatchId>;

    /// Releases a snapshot.
    fn delete_snapshot(&self, batch_id: BatchId) -> SyncResult<()>;

    /// Builds the revision tree of a snapshot.
    fn build_tree(&self, batch_id: BatchId) -> SyncResult<RevisionTree>;

    /// Returns one page of snapshot revisions within `ranges`.
    fn revisions_in_ranges(
        &self,
        batch_id: BatchId,
        ranges: &[RevisionRange],
        resume: Option<Revision>,
    ) -> SyncResult<RevisionPage>;

    /// Fetches snapshot documents by revision, aligned with the input.
    fn documents_for_revisions(
        &self,
        batch_id: BatchId,
        revisions: &[Revision],
    ) -> SyncResult<Vec<Option<Document>>>;

    /// Stores replicated document versions. Returns how many were applied.
    fn apply(&self, collection: &str, documents: Vec<Document>) -> SyncResult<usize>;
}

/// Endpoint over an in-process database.
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    db: Arc<Database>,
}

impl LocalEndpoint {
    /// Creates an endpoint over `db`.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the database.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl ReplicaEndpoint for LocalEndpoint {
    fn create_snapshot(&self, collection: &str, ttl: Option<Duration>) -> SyncResult<BatchId> {
        Ok(self.db.create_snapshot(collection, ttl)?)
    }

    fn delete_snapshot(&self, batch_id: BatchId) -> SyncResult<()> {
        Ok(self.db.delete_snapshot(batch_id)?)
    }

    fn build_tree(&self, batch_id: BatchId) -> SyncResult<RevisionTree> {
        Ok(self.db.build_tree(batch_id)?)
    }

    fn revisions_in_ranges(
        &self,
        batch_id: BatchId,
        ranges: &[RevisionRange],
        resume: Option<Revision>,
    ) -> SyncResult<RevisionPage> {
        Ok(self.db.revisions_in_ranges(batch_id, ranges, resume)?)
    }

    fn documents_for_revisions(
        &self,
        batch_id: BatchId,
        revisions: &[Revision],
    ) -> SyncResult<Vec<Option<Document>>> {
        Ok(self.db.documents_for_revisions(batch_id, revisions)?)
    }

    fn apply(&self, collection: &str, documents: Vec<Document>) -> SyncResult<usize> {
        let collection = self.db.collection(collection)?;
        let mut applied = 0;
        for doc in documents {
            if collection.apply_replicated(doc)? {
                applied += 1;
            }
        }
        Ok(applied)
    }
}

/// Endpoint that round-trips every message through CBOR.
#[derive(Debug, Clone)]
pub struct ProtocolEndpoint<E> {
    inner: E,
}

impl<E: ReplicaEndpoint> ProtocolEndpoint<E> {
    /// Wraps `inner`.
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    /// Returns the wrapped endpoint.
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

/// Sends `message` over the wire and reads it back on the other side.
fn wire<T: Encode + Decode>(message: &T) -> SyncResult<T> {
    let bytes = message.encode()?;
    trace!(bytes = bytes.len(), "message on the wire");
    Ok(T::decode(&bytes)?)
}

impl<E: ReplicaEndpoint> ReplicaEndpoint for ProtocolEndpoint<E> {
    fn create_snapshot(&self, collection: &str, ttl: Option<Duration>) -> SyncResult<BatchId> {
        let request = wire(&CreateSnapshotRequest {
            collection: collection.to_string(),
            ttl,
        })?;
        let batch_id = self.inner.create_snapshot(&request.collection, request.ttl)?;
        Ok(wire(&CreateSnapshotResponse { batch_id })?.batch_id)
    }

    fn delete_snapshot(&self, batch_id: BatchId) -> SyncResult<()> {
        let request = wire(&DeleteSnapshotRequest { batch_id })?;
        self.inner.delete_snapshot(request.batch_id)
    }

    fn build_tree(&self, batch_id: BatchId) -> SyncResult<RevisionTree> {
        let request = wire(&TreeRequest { batch_id })?;
        let tree = self.inner.build_tree(request.batch_id)?;
        Ok(wire(&TreeMessage::from(&tree))?.into_tree()?)
    }

    fn revisions_in_ranges(
        &self,
        batch_id: BatchId,
        ranges: &[RevisionRange],
        resume: Option<Revision>,
    ) -> SyncResult<RevisionPage> {
        let request = wire(&RangesRequest {
            batch_id,
            ranges: ranges.to_vec(),
            resume,
        })?;
        let page = self
            .inner
            .revisions_in_ranges(request.batch_id, &request.ranges, request.resume)?;
        Ok(wire(&RangesResponse::from(page))?.into())
    }

    fn documents_for_revisions(
        &self,
        batch_id: BatchId,
        revisions: &[Revision],
    ) -> SyncResult<Vec<Option<Document>>> {
        let request = wire(&DocumentsRequest {
            batch_id,
            revisions: revisions.to_vec(),
        })?;
        let documents = self
            .inner
            .documents_for_revisions(request.batch_id, &request.revisions)?;
        Ok(wire(&DocumentsResponse::from_documents(&documents))?.into_documents())
    }

    fn apply(&self, collection: &str, documents: Vec<Document>) -> SyncResult<usize> {
        let payload: Vec<Option<Document>> = documents.into_iter().map(Some).collect();
        let received = wire(&DocumentsResponse::from_documents(&payload))?
            .into_documents()
            .into_iter()
            .flatten()
            .collect();
        self.inner.apply(collection, received)
    }
}
