//! Delivery of outbox entries to the remote store.

use crate::error::{SyncError, SyncResult};
use driftwood_protocol::{
    now_millis, ConflictPolicy, PushOutcome, RemoteDocument, RemoteStore, RevisionId,
    SyncQueueEntry, Winner,
};
use driftwood_store::{CoreError, Entity, EntityStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries the remote accepted.
    pub pushed: usize,
    /// Entries that met a diverging remote revision.
    pub conflicts: usize,
    /// Entries that failed and stay queued.
    pub failed: usize,
    /// Entries held back because an earlier entry of the same entity did not
    /// go through.
    pub skipped: usize,
}

impl DrainReport {
    /// Returns true if every entry of the pass was delivered.
    pub fn is_clean(&self) -> bool {
        self.conflicts == 0 && self.failed == 0 && self.skipped == 0
    }
}

/// Pushes outbox entries to a [`RemoteStore`] in `created_at` order.
///
/// Each entry is pushed on top of the revision the device last saw from the
/// remote. When the remote holds a diverging revision the conflict is
/// recorded locally and the configured policy picks the winner:
///
/// - local wins: the entry stays queued and is pushed again on the next
///   pass, this time on top of the remote winner
/// - remote wins: every entry of the entity is dropped
pub struct OutboxDrainer<R: RemoteStore> {
    store: Arc<EntityStore>,
    remote: Arc<R>,
    policy: ConflictPolicy,
}

impl<R: RemoteStore> OutboxDrainer<R> {
    /// Creates a drainer using last-writer-wins resolution.
    pub fn new(store: Arc<EntityStore>, remote: Arc<R>) -> Self {
        Self {
            store,
            remote,
            policy: ConflictPolicy::default(),
        }
    }

    /// Sets the conflict policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the conflict policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Runs one pass over the outbox.
    ///
    /// Store failures abort the pass; remote failures are counted and the
    /// entry stays queued with its attempt counter raised.
    pub async fn drain_once(&self) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut held: HashSet<String> = HashSet::new();

        for entry in self.store.queue_entries() {
            if held.contains(&entry.entity_id) {
                report.skipped += 1;
                continue;
            }
            match self.deliver(&entry).await {
                Ok(Delivery::Pushed) => report.pushed += 1,
                Ok(Delivery::Kept | Delivery::Superseded) => {
                    report.conflicts += 1;
                    held.insert(entry.entity_id.clone());
                }
                Err(SyncError::Remote(err)) => {
                    let attempts = self.store.record_attempt(entry.id)?;
                    warn!(id = %entry.id, entity = %entry.entity_id, attempts, error = %err, "push failed");
                    report.failed += 1;
                    held.insert(entry.entity_id.clone());
                }
                Err(err) => return Err(err),
            }
        }

        if report.pushed + report.conflicts + report.failed > 0 {
            info!(
                pushed = report.pushed,
                conflicts = report.conflicts,
                failed = report.failed,
                skipped = report.skipped,
                "outbox drained"
            );
        }
        Ok(report)
    }

    async fn deliver(&self, entry: &SyncQueueEntry) -> SyncResult<Delivery> {
        let kind = entry.entity_type;
        let body = Entity::from_json(entry.payload.clone())?.to_remote_body()?;
        let base = self
            .store
            .get(kind, &entry.entity_id)?
            .and_then(|e| e.meta.server_version);

        let content = serde_json::to_vec(&body).map_err(|e| CoreError::codec(e.to_string()))?;
        let doc = RemoteDocument::new(
            entry.entity_id.as_str(),
            RevisionId::next(base.as_ref(), &content),
            body,
        );

        match self.remote.push(doc, base).await? {
            PushOutcome::Accepted { rev } => {
                self.store.dequeue(entry.id)?;
                if self.store.get(kind, &entry.entity_id)?.is_some() {
                    self.store.mark_synced(kind, &entry.entity_id, rev.clone())?;
                }
                debug!(id = %entry.id, entity = %entry.entity_id, %rev, "pushed");
                Ok(Delivery::Pushed)
            }
            PushOutcome::Conflict { winner } => {
                let resolved = if winner.deleted {
                    self.store
                        .apply_remote_delete(kind, &entry.entity_id, winner.rev.clone())?
                } else {
                    let remote = Entity::from_remote(&winner, now_millis())?;
                    self.store
                        .record_conflict(kind, winner.rev.clone(), remote, self.policy)?
                };

                match resolved {
                    Winner::Local => {
                        self.store.record_attempt(entry.id)?;
                        debug!(entity = %entry.entity_id, remote = %winner.rev, "local revision kept");
                        Ok(Delivery::Kept)
                    }
                    Winner::Remote => {
                        for stale in self.store.queue_entries_for(&entry.entity_id) {
                            self.store.dequeue(stale.id)?;
                        }
                        if self.store.get(kind, &entry.entity_id)?.is_some() {
                            self.store
                                .mark_synced(kind, &entry.entity_id, winner.rev.clone())?;
                        }
                        debug!(entity = %entry.entity_id, remote = %winner.rev, "local edits superseded");
                        Ok(Delivery::Superseded)
                    }
                }
            }
        }
    }
}

enum Delivery {
    Pushed,
    Kept,
    Superseded,
}
