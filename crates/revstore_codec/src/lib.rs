//! # revstore codec
//!
//! Document bodies for revstore.
//!
//! This crate provides:
//! - [`Value`], the structured body stored for every document
//! - merge-patch semantics used by partial updates (`keepNull`,
//!   `mergeObjects`)
//! - deterministic CBOR encoding (objects are emitted in key order, so
//!   identical values always produce identical bytes)
//! - JSON interop for import sources and diagnostics
//!
//! ## Usage
//!
//! ```
//! use revstore_codec::{to_cbor, from_cbor, Value};
//!
//! let body = Value::object([("name", Value::from("alice")), ("age", Value::from(30))]);
//! let bytes = to_cbor(&body).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), body);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod encoder;
mod error;
mod json;
mod merge;
mod value;

pub use encoder::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use json::{from_json_str, to_json_string};
pub use merge::MergeOptions;
pub use value::{Object, Value};

/// Trait for types that can be encoded to deterministic CBOR.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
