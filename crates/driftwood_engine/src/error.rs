//! Error types for the sync engine.

use driftwood_protocol::RemoteError;
use driftwood_store::CoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The document was malformed or addressed an internal namespace. It was
    /// neither written nor queued.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Local store failure.
    #[error("store error: {0}")]
    Store(CoreError),

    /// Remote store failure.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The remote transport did not become available in time.
    #[error("remote not available after {waited:?}")]
    StartupTimeout {
        /// How long the subscriber waited.
        waited: Duration,
    },

    /// `reconnect()` was called before any document was watched, or the
    /// feed was stopped while a start waited for the transport.
    #[error("no document is being watched")]
    NotListening,

    /// The service was disposed.
    #[error("sync service disposed")]
    Disposed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true if the operation may succeed on a later pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_transient(),
            SyncError::StartupTimeout { .. } => true,
            _ => false,
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        if err.is_validation() {
            SyncError::Validation(err.to_string())
        } else {
            SyncError::Store(err)
        }
    }
}
