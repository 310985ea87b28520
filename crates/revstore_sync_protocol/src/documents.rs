//! Document fetch by revision.

use crate::fields::{decode_map, int, u64_list, Fields};
use revstore_codec::{to_cbor, CodecError, CodecResult, Decode, Encode, Value};
use revstore_core::{BatchId, Document, Revision};

/// Asks for the snapshot documents carrying `revisions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentsRequest {
    /// Snapshot to read from.
    pub batch_id: BatchId,
    /// Revisions to fetch.
    pub revisions: Vec<Revision>,
}

impl Encode for DocumentsRequest {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let revisions = self.revisions.iter().map(|r| int(r.as_u64())).collect();
        to_cbor(&Value::object([
            ("batch_id", int(self.batch_id.as_u64())),
            ("revisions", Value::Array(revisions)),
        ]))
    }
}

impl Decode for DocumentsRequest {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            Ok(Self {
                batch_id: BatchId::new(f.u64("batch_id")?),
                revisions: u64_list("revisions", f.array("revisions")?)?
                    .into_iter()
                    .map(Revision::new)
                    .collect(),
            })
        })
    }
}

/// One document version on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    /// Document key.
    pub key: String,
    /// Revision of this version.
    pub revision: Revision,
    /// Tombstone marker.
    pub deleted: bool,
    /// Body; null for tombstones.
    pub body: Value,
}

impl DocumentRecord {
    /// Converts into a core document.
    pub fn into_document(self) -> Document {
        if self.deleted {
            Document::tombstone(self.key, self.revision)
        } else {
            Document::new(self.key, self.revision, self.body)
        }
    }

    fn to_value(&self) -> Value {
        Value::object([
            ("key", Value::from(self.key.as_str())),
            ("rev", int(self.revision.as_u64())),
            ("deleted", Value::Bool(self.deleted)),
            ("body", self.body.clone()),
        ])
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let f = Fields::of(value)?;
        let deleted = match f.get("deleted") {
            None => false,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| CodecError::invalid_structure("deleted must be a bool"))?,
        };
        let body = f.get("body").cloned().unwrap_or(Value::Null);
        if !deleted && !body.is_object() {
            return Err(CodecError::invalid_structure("live document body must be a map"));
        }
        Ok(Self {
            key: f.text("key")?.to_string(),
            revision: Revision::new(f.u64("rev")?),
            deleted,
            body,
        })
    }
}

impl From<&Document> for DocumentRecord {
    fn from(doc: &Document) -> Self {
        Self {
            key: doc.key().to_string(),
            revision: doc.revision(),
            deleted: doc.is_deleted(),
            body: doc.body().clone(),
        }
    }
}

/// Documents aligned with the requested revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentsResponse {
    /// `None` where the snapshot holds no document with that revision.
    pub documents: Vec<Option<DocumentRecord>>,
}

impl DocumentsResponse {
    /// Builds a response from snapshot lookups.
    pub fn from_documents(documents: &[Option<Document>]) -> Self {
        Self {
            documents: documents
                .iter()
                .map(|d| d.as_ref().map(DocumentRecord::from))
                .collect(),
        }
    }

    /// Converts into core documents.
    pub fn into_documents(self) -> Vec<Option<Document>> {
        self.documents
            .into_iter()
            .map(|d| d.map(DocumentRecord::into_document))
            .collect()
    }
}

impl Encode for DocumentsResponse {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        let documents = self
            .documents
            .iter()
            .map(|d| d.as_ref().map_or(Value::Null, DocumentRecord::to_value))
            .collect();
        to_cbor(&Value::object([("documents", Value::Array(documents))]))
    }
}

impl Decode for DocumentsResponse {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_map(bytes, |f| {
            let documents = f
                .array("documents")?
                .iter()
                .map(|v| {
                    if v.is_null() {
                        Ok(None)
                    } else {
                        DocumentRecord::from_value(v).map(Some)
                    }
                })
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Self { documents })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record() -> impl Strategy<Value = DocumentRecord> {
        ("[a-z0-9_-]{1,12}", any::<u64>(), any::<bool>(), any::<i64>()).prop_map(
            |(key, revision, deleted, n)| DocumentRecord {
                key,
                revision: Revision::new(revision),
                deleted,
                body: if deleted {
                    Value::Null
                } else {
                    Value::object([("n", Value::from(n))])
                },
            },
        )
    }

    #[test]
    fn gaps_and_tombstones_survive() {
        let docs = vec![
            Some(Document::new(
                "a",
                Revision::new(7),
                Value::object([("n", Value::from(1))]),
            )),
            None,
            Some(Document::tombstone("b", Revision::new(9))),
        ];
        let response = DocumentsResponse::from_documents(&docs);
        let decoded = DocumentsResponse::decode(&response.encode().unwrap())
            .unwrap()
            .into_documents();
        assert_eq!(decoded, docs);
    }

    #[test]
    fn live_record_needs_a_map_body() {
        let bytes = to_cbor(&Value::object([(
            "documents",
            Value::Array(vec![Value::object([
                ("key", Value::from("a")),
                ("rev", Value::from(1)),
                ("body", Value::from(5)),
            ])]),
        )]))
        .unwrap();
        assert!(DocumentsResponse::decode(&bytes).is_err());
    }

    #[test]
    fn request_keeps_order() {
        let request = DocumentsRequest {
            batch_id: BatchId::new(2),
            revisions: vec![Revision::new(9), Revision::new(3)],
        };
        let decoded = DocumentsRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.revisions, request.revisions);
    }

    proptest! {
        #[test]
        fn any_documents_response_survives_the_wire(
            documents in prop::collection::vec(prop::option::of(record()), 0..16),
        ) {
            let response = DocumentsResponse { documents };
            let decoded = DocumentsResponse::decode(&response.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, response);
        }
    }
}
