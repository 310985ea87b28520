//! # revstore sync protocol
//!
//! Reconciliation messages and CBOR codecs for revstore.
//!
//! This crate provides:
//! - Snapshot lifecycle requests (create, delete)
//! - Revision tree transfer (`TreeMessage`: header plus one count and hash
//!   per leaf)
//! - Revision range paging (`RangesRequest` / `RangesResponse`)
//! - Document fetch by revision (`DocumentsRequest` / `DocumentsResponse`)
//! - The import statistics record
//!
//! Every message implements [`Encode`] and [`Decode`] from
//! `revstore_codec`. Unsigned 64-bit values (revisions, hashes, batch ids)
//! travel as CBOR integers reinterpreted bit for bit.
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod documents;
mod fields;
mod ranges;
mod snapshot;
mod stats;
mod tree;

pub use documents::{DocumentRecord, DocumentsRequest, DocumentsResponse};
pub use ranges::{RangesRequest, RangesResponse};
pub use snapshot::{CreateSnapshotRequest, CreateSnapshotResponse, DeleteSnapshotRequest};
pub use stats::ImportStatsRecord;
pub use tree::{TreeMessage, TreeRequest};

pub use revstore_codec::{CodecError, CodecResult, Decode, Encode};

/// Version of the message formats in this crate.
pub const PROTOCOL_VERSION: u16 = 1;
