//! Error types for revstore core.

use crate::types::{BatchId, Revision};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
///
/// Callers that only care about the class of failure (for example to map
/// it onto a transport status) match on this instead of the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed call, rejected before any mutation.
    InvalidArgument,
    /// Missing document, collection or snapshot (including expired ones).
    NotFound,
    /// Revision precondition did not hold.
    PreconditionFailed,
    /// Uniqueness violation or aborted complete-mode import.
    Conflict,
    /// Operation not supported for this collection.
    Unimplemented,
    /// Durability or internal failure.
    Internal,
}

/// Errors that can occur in revstore core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed request.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of what was wrong.
        message: String,
    },

    /// Document not found.
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// Snapshot unknown, deleted, or expired.
    #[error("snapshot not found or expired: {batch_id}")]
    SnapshotNotFound {
        /// The batch id that was used.
        batch_id: BatchId,
    },

    /// Expected revision did not match the current revision.
    #[error("precondition failed for {key}: expected {expected}, found {}", fmt_revision(.actual))]
    PreconditionFailed {
        /// Document key.
        key: String,
        /// Revision the caller expected.
        expected: Revision,
        /// Current live revision, if the document exists.
        actual: Option<Revision>,
    },

    /// Uniqueness or import conflict.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Operation not supported.
    #[error("not implemented: {message}")]
    Unimplemented {
        /// What was requested.
        message: String,
    },

    /// Flushing to durable storage failed.
    #[error("durability error: {message}")]
    Durability {
        /// Description of the failure.
        message: String,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] revstore_codec::CodecError),

    /// Internal invariant violation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

fn fmt_revision(revision: &Option<Revision>) -> String {
    revision.map_or_else(|| "none".to_string(), |r| r.to_string())
}

impl CoreError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a document not found error.
    pub fn document_not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates a precondition failed error.
    pub fn precondition_failed(
        key: impl Into<String>,
        expected: Revision,
        actual: Option<Revision>,
    ) -> Self {
        Self::PreconditionFailed {
            key: key.into(),
            expected,
            actual,
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an unimplemented error.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented {
            message: message.into(),
        }
    }

    /// Creates a durability error.
    pub fn durability(message: impl Into<String>) -> Self {
        Self::Durability {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::Codec(_) => ErrorKind::InvalidArgument,
            Self::DocumentNotFound { .. }
            | Self::CollectionNotFound { .. }
            | Self::SnapshotNotFound { .. } => ErrorKind::NotFound,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Unimplemented { .. } => ErrorKind::Unimplemented,
            Self::Durability { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this is a not-found class error.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            CoreError::invalid_argument("x").kind(),
            ErrorKind::InvalidArgument
        );
        assert!(CoreError::document_not_found("a").is_not_found());
        assert!(CoreError::SnapshotNotFound {
            batch_id: BatchId::new(3)
        }
        .is_not_found());
        assert_eq!(
            CoreError::precondition_failed("a", Revision::new(1), Some(Revision::new(2))).kind(),
            ErrorKind::PreconditionFailed
        );
        assert_eq!(CoreError::conflict("dup").kind(), ErrorKind::Conflict);
        assert_eq!(
            CoreError::unimplemented("legacy").kind(),
            ErrorKind::Unimplemented
        );
    }

    #[test]
    fn precondition_display() {
        let err = CoreError::precondition_failed("a", Revision::new(5), None);
        assert_eq!(
            err.to_string(),
            "precondition failed for a: expected rev:5, found none"
        );
    }
}
