//! Errors reported by remote-store implementations.

use crate::revision::RevisionId;
use thiserror::Error;

/// Result type for remote-store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors a remote store can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote store cannot be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The addressed revision does not exist (anymore).
    #[error("revision {rev} of {doc_id} no longer exists")]
    RevisionMissing {
        /// Document id.
        doc_id: String,
        /// Revision that was addressed.
        rev: RevisionId,
    },

    /// The addressed revision is the current winner and may not be deleted.
    #[error("revision {rev} is the winning revision of {doc_id}")]
    WinnerProtected {
        /// Document id.
        doc_id: String,
        /// Revision that was addressed.
        rev: RevisionId,
    },

    /// The remote store refused the request.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Returns true if the operation may succeed on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Unavailable(_) | RemoteError::RevisionMissing { .. }
        )
    }

    /// Returns true if the addressed revision is already gone.
    pub fn is_missing_revision(&self) -> bool {
        matches!(self, RemoteError::RevisionMissing { .. })
    }
}
