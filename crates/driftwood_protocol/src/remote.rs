//! Contract of the remote document store.
//!
//! The core only depends on these traits; the concrete transport is supplied
//! by the host application.

use crate::change::FeedEvent;
use crate::conflict::{ConflictInfo, PruneTarget};
use crate::document::RemoteDocument;
use crate::error::RemoteResult;
use crate::filter::{FilterSubject, ReplicationFilter};
use crate::revision::RevisionId;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Outcome of pushing one revision.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The revision became the new winner.
    Accepted {
        /// Revision now current on the remote.
        rev: RevisionId,
    },
    /// The base revision was stale; nothing was written.
    Conflict {
        /// The remote's current winning revision.
        winner: RemoteDocument,
    },
}

/// Closes a live subscription when cancelled or dropped.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    /// Creates a handle and the signal the remote side listens on.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { cancel: Some(tx) }, rx)
    }

    /// Cancels the subscription. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Returns true until the handle has been cancelled.
    pub fn is_active(&self) -> bool {
        self.cancel.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A live subscription to changes of one document.
#[derive(Debug)]
pub struct Subscription {
    /// Events, in the order the remote emitted them.
    pub events: mpsc::Receiver<FeedEvent>,
    /// Handle closing the subscription.
    pub handle: SubscriptionHandle,
}

/// A remote store supporting revision-aware writes and live subscriptions.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Returns true once the transport is ready to accept requests.
    fn is_available(&self) -> bool;

    /// Writes `doc` on top of `base`, the revision the writer last saw.
    async fn push(&self, doc: RemoteDocument, base: Option<RevisionId>)
        -> RemoteResult<PushOutcome>;

    /// Fetches the current winning revision of a document.
    async fn fetch(&self, doc_id: &str) -> RemoteResult<Option<RemoteDocument>>;

    /// Opens a live subscription for one document.
    async fn subscribe(&self, doc_id: &str) -> RemoteResult<Subscription>;
}

/// A document found with losing revisions during a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictCandidate {
    /// Explicit `type` of the winning revision, if any.
    pub doc_type: Option<String>,
    /// The losing revisions.
    pub info: ConflictInfo,
}

impl FilterSubject for ConflictCandidate {
    fn doc_id(&self) -> Option<&str> {
        Some(self.info.doc_id())
    }

    fn doc_type(&self) -> Option<&str> {
        self.doc_type.as_deref()
    }
}

/// Result of scanning a store for conflicts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    /// Number of syncable documents inspected.
    pub documents_checked: usize,
    /// Documents with at least one losing revision.
    pub candidates: Vec<ConflictCandidate>,
}

impl ScanReport {
    /// Returns the total number of losing revisions found.
    pub fn conflict_count(&self) -> usize {
        self.candidates.iter().map(|c| c.info.conflict_count()).sum()
    }
}

/// A store whose revision trees can be scanned and pruned.
#[async_trait]
pub trait RevisionSource: Send + Sync + 'static {
    /// Scans every document `filter` accepts for losing revisions.
    /// Documents the filter rejects are neither counted nor returned.
    async fn scan_conflicts(&self, filter: &ReplicationFilter) -> RemoteResult<ScanReport>;

    /// Deletes one losing revision. Reports `RevisionMissing` if it is
    /// already gone.
    async fn remove_revision(&self, target: &PruneTarget) -> RemoteResult<()>;
}
