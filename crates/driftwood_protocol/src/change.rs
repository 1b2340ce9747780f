//! Events delivered by a live change subscription.

use crate::document::RemoteDocument;
use crate::error::RemoteError;
use crate::revision::RevisionId;

/// A change to one document on the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// A new winning revision.
    Updated(RemoteDocument),
    /// The document was deleted. Carried as its own variant so the local
    /// store can write a tombstone instead of ignoring the event.
    Deleted {
        /// Document id.
        id: String,
        /// The deletion revision.
        rev: RevisionId,
    },
}

impl RemoteChange {
    /// Returns the id of the changed document.
    pub fn doc_id(&self) -> &str {
        match self {
            RemoteChange::Updated(doc) => &doc.id,
            RemoteChange::Deleted { id, .. } => id,
        }
    }

    /// Returns the revision carried by the change.
    pub fn rev(&self) -> &RevisionId {
        match self {
            RemoteChange::Updated(doc) => &doc.rev,
            RemoteChange::Deleted { rev, .. } => rev,
        }
    }

    /// Returns true for deletions.
    pub fn is_delete(&self) -> bool {
        matches!(self, RemoteChange::Deleted { .. })
    }
}

impl From<RemoteDocument> for RemoteChange {
    fn from(doc: RemoteDocument) -> Self {
        if doc.deleted {
            RemoteChange::Deleted {
                id: doc.id,
                rev: doc.rev,
            }
        } else {
            RemoteChange::Updated(doc)
        }
    }
}

/// An event on a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A document changed.
    Change(RemoteChange),
    /// The subscription failed.
    Error(RemoteError),
    /// The remote closed the subscription.
    Complete,
}
