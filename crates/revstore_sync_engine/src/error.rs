//! Error types for the reconciliation engine.

use revstore_codec::CodecError;
use revstore_core::CoreError;
use thiserror::Error;

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reconciling replicas.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A replica sent something that violates the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A replica rejected the request.
    #[error("replica error: {0}")]
    Core(#[from] CoreError),

    /// Encoding or decoding a message failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reconciliation was cancelled.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// The polling deadline elapsed.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revstore_core::BatchId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::from(CoreError::SnapshotNotFound {
            batch_id: BatchId::new(1)
        })
        .is_retryable());
    }

    #[test]
    fn core_errors_keep_their_message() {
        let err = SyncError::from(CoreError::unimplemented("legacy collection"));
        assert!(err.to_string().contains("legacy collection"));
    }
}
