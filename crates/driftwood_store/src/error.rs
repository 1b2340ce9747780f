//! Error types for the Driftwood store.

use driftwood_protocol::{EntityKind, QueueEntryId, RemoteError, RevisionId};
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error from a journal backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A journal record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal is corrupted.
    #[error("journal corruption: {message}")]
    JournalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A document failed validation and was not written.
    #[error("invalid document: {message}")]
    Validation {
        /// Why the document was rejected.
        message: String,
    },

    /// The entity kind does not match the stored or supplied body.
    #[error("kind mismatch for {id}: expected {expected}, found {found}")]
    KindMismatch {
        /// Document id.
        id: String,
        /// Kind the caller asked for.
        expected: EntityKind,
        /// Kind actually present.
        found: EntityKind,
    },

    /// Entity not found.
    #[error("{kind} not found: {id}")]
    EntityNotFound {
        /// Kind searched.
        kind: EntityKind,
        /// Id searched.
        id: String,
    },

    /// The field is not indexed for this kind.
    #[error("no index on {kind}.{field}")]
    UnknownIndex {
        /// Kind queried.
        kind: EntityKind,
        /// Field queried.
        field: String,
    },

    /// The revision is not a losing revision of the document.
    #[error("revision {rev} of {doc_id} no longer exists")]
    RevisionMissing {
        /// Document id.
        doc_id: String,
        /// Addressed revision.
        rev: RevisionId,
    },

    /// The revision is the current winner.
    #[error("revision {rev} is the winning revision of {doc_id}")]
    WinnerProtected {
        /// Document id.
        doc_id: String,
        /// Addressed revision.
        rev: RevisionId,
    },

    /// Outbox entry not found.
    #[error("outbox entry not found: {0}")]
    QueueEntryNotFound(QueueEntryId),
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            message: message.into(),
        }
    }

    /// Returns true if the error is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::KindMismatch { .. } | Self::UnknownIndex { .. }
        )
    }
}

impl From<CoreError> for RemoteError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::RevisionMissing { doc_id, rev } => RemoteError::RevisionMissing { doc_id, rev },
            CoreError::WinnerProtected { doc_id, rev } => RemoteError::WinnerProtected { doc_id, rev },
            other => RemoteError::Rejected(other.to_string()),
        }
    }
}
