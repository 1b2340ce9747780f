//! In-memory remote store.

use crate::tree::RevisionTree;
use async_trait::async_trait;
use driftwood_protocol::{
    ConflictCandidate, FeedEvent, PruneTarget, PushOutcome, RemoteChange, RemoteDocument,
    RemoteError, RemoteResult, RemoteStore, ReplicationFilter, RevisionId, RevisionSource,
    ScanReport, Subscription, SubscriptionHandle,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

const SUBSCRIPTION_BUFFER: usize = 64;

struct Subscriber {
    events: mpsc::Sender<FeedEvent>,
    cancel: oneshot::Receiver<()>,
}

impl Subscriber {
    fn is_live(&mut self) -> bool {
        !self.events.is_closed()
            && matches!(self.cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    }
}

#[derive(Default)]
struct RemoteState {
    docs: BTreeMap<String, RevisionTree>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    removals: Vec<PruneTarget>,
}

impl RemoteState {
    fn notify(&mut self, doc_id: &str, event: FeedEvent) {
        let Some(subscribers) = self.subscribers.get_mut(doc_id) else {
            return;
        };
        subscribers.retain_mut(|sub| {
            if !sub.is_live() {
                return false;
            }
            match sub.events.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(doc_id, "subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    fn close(&mut self, doc_id: &str, event: FeedEvent) {
        self.notify(doc_id, event);
        self.subscribers.remove(doc_id);
    }
}

/// A remote document store kept in memory.
///
/// ```rust
/// # tokio_test_block_on(async {
/// use driftwood_protocol::{PushOutcome, RemoteDocument, RemoteStore, RevisionId};
/// use driftwood_remote::MemoryRemote;
/// use serde_json::json;
///
/// let remote = MemoryRemote::new();
/// let doc = RemoteDocument::new("tasks:1", RevisionId::next(None, b"draft"), json!({"title": "a"}));
/// let outcome = remote.push(doc, None).await.unwrap();
/// assert!(matches!(outcome, PushOutcome::Accepted { .. }));
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    available: AtomicBool,
    failing_subscribes: AtomicU32,
    failing_removals: AtomicU32,
    subscribe_calls: AtomicU32,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("documents", &self.state.lock().docs.len())
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl MemoryRemote {
    /// Creates an empty, available remote.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            available: AtomicBool::new(true),
            failing_subscribes: AtomicU32::new(0),
            failing_removals: AtomicU32::new(0),
            subscribe_calls: AtomicU32::new(0),
        }
    }

    /// Sets whether the transport accepts requests.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next `n` subscribe calls fail with `Unavailable`.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` revision removals fail with `Unavailable`.
    pub fn fail_next_removals(&self, n: u32) {
        self.failing_removals.store(n, Ordering::SeqCst);
    }

    /// Adds a leaf revision as if replicated from another device, without
    /// checking its base. Subscribers see the new winner.
    pub fn put_revision(&self, doc: RemoteDocument) {
        let mut state = self.state.lock();
        let id = doc.id.clone();
        let tree = state.docs.entry(id.clone()).or_default();
        let before = tree.winner().map(|w| w.rev.clone());
        tree.insert(doc);
        let winner = tree.winner().cloned();

        if let Some(winner) = winner {
            if before.as_ref() != Some(&winner.rev) {
                state.notify(&id, FeedEvent::Change(winner.into()));
            }
        }
    }

    /// Deletes a document on top of its current winner.
    pub fn delete(&self, doc_id: &str) -> RemoteResult<RevisionId> {
        let mut state = self.state.lock();
        let tree = state
            .docs
            .get_mut(doc_id)
            .ok_or_else(|| RemoteError::Rejected(format!("{doc_id} does not exist")))?;
        let Some(winner) = tree.winner().map(|w| w.rev.clone()) else {
            return Err(RemoteError::Rejected(format!("{doc_id} has no revisions")));
        };

        let rev = RevisionId::next(Some(&winner), b"deleted");
        tree.remove(&winner);
        tree.insert(RemoteDocument::tombstone(doc_id, rev.clone()));
        state.notify(
            doc_id,
            FeedEvent::Change(RemoteChange::Deleted {
                id: doc_id.to_string(),
                rev: rev.clone(),
            }),
        );
        Ok(rev)
    }

    /// Sends an error to every subscriber of `doc_id` and ends their streams.
    pub fn emit_error(&self, doc_id: &str, error: RemoteError) {
        self.state.lock().close(doc_id, FeedEvent::Error(error));
    }

    /// Ends every stream of `doc_id` with `Complete`.
    pub fn complete(&self, doc_id: &str) {
        self.state.lock().close(doc_id, FeedEvent::Complete);
    }

    /// Returns the number of live subscriptions for `doc_id`.
    pub fn subscriber_count(&self, doc_id: &str) -> usize {
        let mut state = self.state.lock();
        state.subscribers.get_mut(doc_id).map_or(0, |subs| {
            subs.retain_mut(Subscriber::is_live);
            subs.len()
        })
    }

    /// Returns how many subscribe calls were made, failed ones included.
    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Returns the leaf revisions of a document.
    pub fn revisions(&self, doc_id: &str) -> Vec<RevisionId> {
        self.state
            .lock()
            .docs
            .get(doc_id)
            .map(RevisionTree::revisions)
            .unwrap_or_default()
    }

    /// Returns the current winning revision id of a document.
    pub fn winner(&self, doc_id: &str) -> Option<RevisionId> {
        self.state
            .lock()
            .docs
            .get(doc_id)
            .and_then(|t| t.winner().map(|w| w.rev.clone()))
    }

    /// Returns every removal attempted so far, in order.
    pub fn removal_log(&self) -> Vec<PruneTarget> {
        self.state.lock().removals.clone()
    }

    fn check_available(&self) -> RemoteResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("remote offline".into()))
        }
    }
}

/// Decrements `counter` if it is positive and returns whether it was.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn content_bytes(body: &Value) -> RemoteResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| RemoteError::Rejected(e.to_string()))
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn push(
        &self,
        mut doc: RemoteDocument,
        base: Option<RevisionId>,
    ) -> RemoteResult<PushOutcome> {
        self.check_available()?;
        let content = content_bytes(&doc.body)?;

        let mut state = self.state.lock();
        let current = state
            .docs
            .get(&doc.id)
            .and_then(|t| t.winner().cloned());

        if let Some(winner) = current {
            if base.as_ref() != Some(&winner.rev) {
                debug!(id = %doc.id, base = ?base, winner = %winner.rev, "stale push refused");
                return Ok(PushOutcome::Conflict { winner });
            }
            doc.rev = RevisionId::next(Some(&winner.rev), &content);
            if let Some(tree) = state.docs.get_mut(&doc.id) {
                tree.remove(&winner.rev);
                tree.insert(doc.clone());
            }
        } else {
            doc.rev = RevisionId::next(base.as_ref(), &content);
            state.docs.insert(doc.id.clone(), RevisionTree::new(doc.clone()));
        }

        trace!(id = %doc.id, rev = %doc.rev, "push accepted");
        let rev = doc.rev.clone();
        let id = doc.id.clone();
        state.notify(&id, FeedEvent::Change(doc.into()));
        Ok(PushOutcome::Accepted { rev })
    }

    async fn fetch(&self, doc_id: &str) -> RemoteResult<Option<RemoteDocument>> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .docs
            .get(doc_id)
            .and_then(|t| t.winner().cloned()))
    }

    async fn subscribe(&self, doc_id: &str) -> RemoteResult<Subscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_subscribes) {
            return Err(RemoteError::Unavailable("subscribe failed".into()));
        }
        self.check_available()?;

        let (events, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (handle, cancel) = SubscriptionHandle::new();
        self.state
            .lock()
            .subscribers
            .entry(doc_id.to_string())
            .or_default()
            .push(Subscriber { events, cancel });
        debug!(doc_id, "subscribed");

        Ok(Subscription {
            events: rx,
            handle,
        })
    }
}

#[async_trait]
impl RevisionSource for MemoryRemote {
    async fn scan_conflicts(&self, filter: &ReplicationFilter) -> RemoteResult<ScanReport> {
        self.check_available()?;
        let state = self.state.lock();
        let mut report = ScanReport::default();
        for tree in state.docs.values() {
            let Some(winner) = tree.winner() else {
                continue;
            };
            if !filter.is_syncable(winner) {
                continue;
            }
            report.documents_checked += 1;
            if let Some(info) = tree.conflict_info().filter(|i| !i.is_empty()) {
                report.candidates.push(ConflictCandidate {
                    doc_type: winner.doc_type().map(str::to_string),
                    info,
                });
            }
        }
        Ok(report)
    }

    async fn remove_revision(&self, target: &PruneTarget) -> RemoteResult<()> {
        self.state.lock().removals.push(target.clone());
        if take_failure(&self.failing_removals) {
            return Err(RemoteError::Unavailable("removal failed".into()));
        }
        self.check_available()?;

        let mut state = self.state.lock();
        let missing = || RemoteError::RevisionMissing {
            doc_id: target.doc_id().to_string(),
            rev: target.rev().clone(),
        };
        let tree = state.docs.get_mut(target.doc_id()).ok_or_else(missing)?;
        if tree.winner().is_some_and(|w| &w.rev == target.rev()) {
            return Err(RemoteError::WinnerProtected {
                doc_id: target.doc_id().to_string(),
                rev: target.rev().clone(),
            });
        }
        tree.remove(target.rev()).ok_or_else(missing)?;
        Ok(())
    }
}
