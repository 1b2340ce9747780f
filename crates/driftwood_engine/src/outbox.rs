//! Sync outbox: the durable backlog of local mutations.

use crate::error::{SyncError, SyncResult};
use driftwood_protocol::{
    now_millis, EntityKind, Operation, QueueEntryId, ReplicationFilter, SyncQueueEntry,
};
use driftwood_store::{Entity, EntityStore, SyncStatus};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Queue of mutations waiting for delivery to the remote store.
///
/// Rows are persisted in the entity store's journal, so the backlog survives
/// restarts. Entries are never reordered or coalesced here.
#[derive(Debug, Clone)]
pub struct SyncOutbox {
    store: Arc<EntityStore>,
    filter: ReplicationFilter,
}

impl SyncOutbox {
    /// Creates an outbox over `store` that refuses what the store's
    /// replication filter refuses.
    pub fn new(store: Arc<EntityStore>) -> Self {
        let filter = store.filter().clone();
        Self { store, filter }
    }

    /// Uses `filter` to decide which entities may be queued.
    #[must_use]
    pub fn with_filter(mut self, filter: ReplicationFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// Returns the filter entries are checked against.
    pub fn filter(&self) -> &ReplicationFilter {
        &self.filter
    }

    /// Queues a mutation. Documents the replication filter rejects are
    /// refused with a validation error.
    pub fn enqueue(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
        operation: Operation,
        payload: Value,
    ) -> SyncResult<QueueEntryId> {
        let subject = serde_json::json!({ "_id": entity_id, "type": entity_type.type_name() });
        if entity_id.is_empty() || self.filter.is_internal_id(entity_id) {
            return Err(SyncError::validation(format!(
                "{entity_id:?} may not be synced"
            )));
        }
        if !self.filter.is_syncable(&subject) {
            return Err(SyncError::validation(format!(
                "{entity_id:?} is not a syncable document"
            )));
        }

        let created_at = self.next_timestamp(entity_id);
        let entry = SyncQueueEntry::new(entity_type, entity_id, operation, payload, created_at);
        let id = self.store.enqueue(entry)?;
        debug!(%id, entity_id, %operation, backlog = self.count(), "queued");
        Ok(id)
    }

    /// Returns every pending entry, oldest first.
    pub fn peek_all(&self) -> Vec<SyncQueueEntry> {
        self.store.queue_entries()
    }

    /// Returns the pending entries of one entity, oldest first.
    pub fn pending_for(&self, entity_id: &str) -> Vec<SyncQueueEntry> {
        self.store.queue_entries_for(entity_id)
    }

    /// Removes a delivered entry.
    pub fn remove(&self, id: QueueEntryId) -> SyncResult<()> {
        self.store.dequeue(id)?;
        Ok(())
    }

    /// Records a failed delivery attempt and returns the new attempt count.
    pub fn record_attempt(&self, id: QueueEntryId) -> SyncResult<u32> {
        Ok(self.store.record_attempt(id)?)
    }

    /// Returns the backlog size.
    pub fn count(&self) -> usize {
        self.store.queue_len()
    }

    /// Writes `entity` locally and queues the mutation.
    ///
    /// The local write always wins: if queuing fails afterwards the entity is
    /// marked `syncStatus = error` and the queuing error is returned.
    pub fn stage(
        &self,
        kind: EntityKind,
        mut entity: Entity,
        operation: Operation,
    ) -> SyncResult<QueueEntryId> {
        entity.meta.sync_status = SyncStatus::Pending;
        let id = entity.id().to_string();
        let payload = entity.to_json()?;
        self.store.upsert(kind, entity)?;
        self.queue_after_write(kind, &id, operation, payload)
    }

    /// Soft-deletes an entity locally and queues the deletion.
    pub fn stage_delete(&self, kind: EntityKind, id: &str) -> SyncResult<QueueEntryId> {
        self.store.soft_delete(kind, id)?;
        let payload = self
            .store
            .get(kind, id)?
            .map(|e| e.to_json())
            .transpose()?
            .unwrap_or(Value::Null);
        self.queue_after_write(kind, id, Operation::Delete, payload)
    }

    fn queue_after_write(
        &self,
        kind: EntityKind,
        id: &str,
        operation: Operation,
        payload: Value,
    ) -> SyncResult<QueueEntryId> {
        match self.enqueue(kind, id, operation, payload) {
            Ok(entry_id) => Ok(entry_id),
            Err(err) => {
                warn!(%kind, id, error = %err, "enqueue failed after local write");
                if let Err(mark) = self.store.set_sync_status(kind, id, SyncStatus::Error) {
                    warn!(%kind, id, error = %mark, "could not mark entity as errored");
                }
                Err(err)
            }
        }
    }

    /// Keeps `created_at` non-decreasing per entity even if the wall clock
    /// steps back.
    fn next_timestamp(&self, entity_id: &str) -> i64 {
        let now = now_millis();
        self.store
            .queue_entries_for(entity_id)
            .last()
            .map_or(now, |last| now.max(last.created_at))
    }
}
