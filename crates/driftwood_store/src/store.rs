//! The entity store.

use crate::config::StoreConfig;
use crate::entity::{indexed_fields, Entity, IndexValue, SyncStatus};
use crate::error::{CoreError, CoreResult};
use crate::journal::{
    decode_frames, encode_frame, FileJournal, JournalBackend, JournalRecord, MemoryJournal,
};
use async_trait::async_trait;
use driftwood_protocol::{
    now_millis, ConflictCandidate, ConflictInfo, ConflictPolicy, EntityKind, PruneTarget,
    QueueEntryId, RemoteResult, ReplicationFilter, RevisionId, RevisionSource, ScanReport,
    SyncQueueEntry, VersionStamp, Winner,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info, trace, warn};

/// One document: its winning revision plus any losing revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    pub kind: EntityKind,
    pub rev: RevisionId,
    pub entity: Entity,
    pub conflicts: BTreeMap<RevisionId, Entity>,
}

impl StoredDocument {
    fn conflict_info(&self) -> ConflictInfo {
        ConflictInfo::new(
            self.entity.id(),
            self.rev.clone(),
            self.conflicts.keys().cloned(),
        )
    }
}

type IndexMap = BTreeMap<IndexValue, BTreeSet<String>>;

#[derive(Debug, Default)]
struct StoreState {
    docs: BTreeMap<String, StoredDocument>,
    queue: Vec<SyncQueueEntry>,
    indexes: HashMap<(EntityKind, &'static str), IndexMap>,
}

impl StoreState {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::PutDocument(doc) => self.put(doc),
            JournalRecord::Enqueue(entry) => self.queue.push(entry),
            JournalRecord::Dequeue(id) => self.queue.retain(|e| e.id != id),
            JournalRecord::Attempt(id) => {
                if let Some(entry) = self.queue.iter_mut().find(|e| e.id == id) {
                    entry.attempts = entry.attempts.saturating_add(1);
                }
            }
            JournalRecord::Snapshot { docs, queue } => {
                self.docs.clear();
                self.indexes.clear();
                self.queue = queue;
                for doc in docs {
                    self.put(doc);
                }
            }
        }
    }

    fn put(&mut self, doc: StoredDocument) {
        let id = doc.entity.id().to_string();
        if let Some(old) = self.docs.remove(&id) {
            self.unindex(&old);
        }
        self.index(&doc);
        self.docs.insert(id, doc);
    }

    fn index(&mut self, doc: &StoredDocument) {
        for field in indexed_fields(doc.kind) {
            if let Some(value) = doc.entity.index_value(field) {
                self.indexes
                    .entry((doc.kind, *field))
                    .or_default()
                    .entry(value)
                    .or_default()
                    .insert(doc.entity.id().to_string());
            }
        }
    }

    fn unindex(&mut self, doc: &StoredDocument) {
        for field in indexed_fields(doc.kind) {
            let Some(value) = doc.entity.index_value(field) else {
                continue;
            };
            if let Some(index) = self.indexes.get_mut(&(doc.kind, *field)) {
                if let Some(ids) = index.get_mut(&value) {
                    ids.remove(doc.entity.id());
                    if ids.is_empty() {
                        index.remove(&value);
                    }
                }
            }
        }
    }

    fn doc(&self, kind: EntityKind, id: &str) -> CoreResult<Option<&StoredDocument>> {
        match self.docs.get(id) {
            Some(doc) if doc.kind != kind => Err(CoreError::KindMismatch {
                id: id.to_string(),
                expected: kind,
                found: doc.kind,
            }),
            other => Ok(other),
        }
    }

    fn existing(&self, kind: EntityKind, id: &str) -> CoreResult<&StoredDocument> {
        self.doc(kind, id)?.ok_or_else(|| CoreError::EntityNotFound {
            kind,
            id: id.to_string(),
        })
    }

    fn has_queued(&self, entity_id: &str) -> bool {
        self.queue.iter().any(|e| e.entity_id == entity_id)
    }
}

/// Counters describing the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Documents per kind, soft-deleted ones included.
    pub documents: BTreeMap<EntityKind, usize>,
    /// Soft-deleted documents.
    pub deleted: usize,
    /// Documents with at least one losing revision.
    pub conflicted: usize,
    /// Losing revisions across all documents.
    pub losing_revisions: usize,
    /// Outbox backlog.
    pub queue_len: usize,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

/// Device-local store of typed entities.
///
/// Every write call is atomic: the change is appended to the journal as one
/// frame before it becomes visible, and a failed append leaves the store
/// unchanged. Writers are serialized by the state lock.
pub struct EntityStore {
    journal: Mutex<Box<dyn JournalBackend>>,
    state: RwLock<StoreState>,
    config: StoreConfig,
    filter: ReplicationFilter,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("EntityStore")
            .field("documents", &state.docs.len())
            .field("queue_len", &state.queue.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Opens a store over `backend`, replaying its journal.
    pub fn open<B: JournalBackend + 'static>(mut backend: B, config: StoreConfig) -> CoreResult<Self> {
        let bytes = backend.read_all()?;
        let decoded = decode_frames(&bytes)?;
        if decoded.torn_tail {
            warn!(
                valid = decoded.valid_len,
                total = bytes.len(),
                "discarding incomplete journal tail"
            );
            backend.truncate(decoded.valid_len)?;
        }

        let frames = decoded.records.len();
        let mut state = StoreState::default();
        for record in decoded.records {
            state.apply(record);
        }
        info!(
            frames,
            documents = state.docs.len(),
            queue_len = state.queue.len(),
            "store opened"
        );

        let store = Self {
            journal: Mutex::new(Box::new(backend)),
            state: RwLock::new(state),
            filter: ReplicationFilter::new(config.filter.clone()),
            config,
        };
        if store.config.compact_after_frames > 0 && frames > store.config.compact_after_frames {
            store.compact()?;
        }
        Ok(store)
    }

    /// Opens an empty store kept in memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(MemoryJournal::new(), StoreConfig::default())
    }

    /// Opens or creates a store journaled to the file at `path`.
    pub fn open_path(path: impl AsRef<Path>, config: StoreConfig) -> CoreResult<Self> {
        Self::open(FileJournal::open(path)?, config)
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the replication filter built from the configuration. Sync
    /// components working on this store classify documents with it.
    pub fn filter(&self) -> &ReplicationFilter {
        &self.filter
    }

    // ---- reads ----

    /// Returns the winning revision of an entity, soft-deleted or not.
    pub fn get(&self, kind: EntityKind, id: &str) -> CoreResult<Option<Entity>> {
        Ok(self.state.read().doc(kind, id)?.map(|d| d.entity.clone()))
    }

    /// Returns the id of the winning revision.
    pub fn revision(&self, kind: EntityKind, id: &str) -> CoreResult<Option<RevisionId>> {
        Ok(self.state.read().doc(kind, id)?.map(|d| d.rev.clone()))
    }

    /// Returns a losing revision, if it still exists.
    pub fn losing_revision(&self, id: &str, rev: &RevisionId) -> Option<Entity> {
        self.state
            .read()
            .docs
            .get(id)
            .and_then(|d| d.conflicts.get(rev).cloned())
    }

    /// Lists every entity of `kind` in id order.
    pub fn list(&self, kind: EntityKind) -> Vec<Entity> {
        self.state
            .read()
            .docs
            .values()
            .filter(|d| d.kind == kind)
            .map(|d| d.entity.clone())
            .collect()
    }

    /// Counts entities of `kind`, soft-deleted ones included.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.state.read().docs.values().filter(|d| d.kind == kind).count()
    }

    /// Returns entities of `kind` whose indexed `field` equals `value`, in
    /// id order.
    pub fn query_by_index(
        &self,
        kind: EntityKind,
        field: &str,
        value: impl Into<IndexValue>,
    ) -> CoreResult<Vec<Entity>> {
        let field = indexed_fields(kind)
            .iter()
            .copied()
            .find(|f| *f == field)
            .ok_or_else(|| CoreError::UnknownIndex {
                kind,
                field: field.to_string(),
            })?;

        let value: IndexValue = value.into();
        let state = self.state.read();
        let Some(ids) = state
            .indexes
            .get(&(kind, field))
            .and_then(|index| index.get(&value))
        else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| state.docs.get(id))
            .map(|d| d.entity.clone())
            .collect())
    }

    /// Lists entities of `kind` that carry losing revisions.
    pub fn list_conflicted(&self, kind: EntityKind) -> Vec<(Entity, ConflictInfo)> {
        self.state
            .read()
            .docs
            .values()
            .filter(|d| d.kind == kind && !d.conflicts.is_empty())
            .map(|d| (d.entity.clone(), d.conflict_info()))
            .collect()
    }

    /// Returns the conflict info of one entity.
    pub fn conflict_info(&self, kind: EntityKind, id: &str) -> CoreResult<Option<ConflictInfo>> {
        Ok(self.state.read().doc(kind, id)?.map(StoredDocument::conflict_info))
    }

    /// Scans every document `filter` accepts for losing revisions.
    pub fn scan_conflicts(&self, filter: &ReplicationFilter) -> ScanReport {
        let state = self.state.read();
        let mut report = ScanReport::default();
        for doc in state.docs.values() {
            if !filter.is_syncable(&doc.entity) {
                continue;
            }
            report.documents_checked += 1;
            if !doc.conflicts.is_empty() {
                report.candidates.push(ConflictCandidate {
                    doc_type: Some(doc.kind.type_name().to_string()),
                    info: doc.conflict_info(),
                });
            }
        }
        report
    }

    /// Returns counters describing the store.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let journal_bytes = self.journal.lock().size()?;
        let state = self.state.read();
        let mut stats = StoreStats {
            queue_len: state.queue.len(),
            journal_bytes,
            ..StoreStats::default()
        };
        for doc in state.docs.values() {
            *stats.documents.entry(doc.kind).or_default() += 1;
            stats.deleted += usize::from(doc.entity.is_deleted());
            stats.conflicted += usize::from(!doc.conflicts.is_empty());
            stats.losing_revisions += doc.conflicts.len();
        }
        Ok(stats)
    }

    // ---- local writes ----

    /// Inserts or replaces the winning revision of an entity and returns the
    /// new revision id. Losing revisions are kept.
    pub fn upsert(&self, kind: EntityKind, entity: Entity) -> CoreResult<RevisionId> {
        validate(&self.filter, kind, &entity)?;

        let mut state = self.state.write();
        if entity.meta.sync_status == SyncStatus::Synced && state.has_queued(entity.id()) {
            return Err(CoreError::validation(format!(
                "{} has queued changes and cannot be marked synced",
                entity.id()
            )));
        }

        let (parent, conflicts) = match state.doc(kind, entity.id())? {
            Some(doc) => (Some(doc.rev.clone()), doc.conflicts.clone()),
            None => (None, BTreeMap::new()),
        };
        let rev = next_revision(parent.as_ref(), &entity)?;
        debug!(%kind, id = entity.id(), %rev, "upsert");

        let doc = StoredDocument {
            kind,
            rev: rev.clone(),
            entity,
            conflicts,
        };
        self.commit(&mut state, JournalRecord::PutDocument(doc))?;
        Ok(rev)
    }

    /// Marks an entity deleted. The row is kept as a tombstone so the
    /// deletion replicates. Deleting a deleted entity changes nothing.
    pub fn soft_delete(&self, kind: EntityKind, id: &str) -> CoreResult<RevisionId> {
        let mut state = self.state.write();
        let doc = state.existing(kind, id)?;
        if doc.entity.is_deleted() {
            return Ok(doc.rev.clone());
        }

        let now = now_millis();
        let mut entity = doc.entity.clone();
        entity.meta.is_deleted = true;
        entity.meta.deleted_at = Some(now);
        entity.meta.updated_at = now;
        entity.meta.sync_status = SyncStatus::Pending;

        let rev = next_revision(Some(&doc.rev), &entity)?;
        let doc = StoredDocument {
            kind,
            rev: rev.clone(),
            entity,
            conflicts: doc.conflicts.clone(),
        };
        debug!(%kind, id, %rev, "soft delete");
        self.commit(&mut state, JournalRecord::PutDocument(doc))?;
        Ok(rev)
    }

    /// Sets the replication state of an entity without creating a revision.
    ///
    /// `Synced` is refused while outbox entries reference the entity, and
    /// stamps `syncedAt` if it is missing.
    pub fn set_sync_status(&self, kind: EntityKind, id: &str, status: SyncStatus) -> CoreResult<()> {
        let mut state = self.state.write();
        let doc = state.existing(kind, id)?;
        if doc.entity.meta.sync_status == status {
            return Ok(());
        }
        if status == SyncStatus::Synced && state.has_queued(id) {
            return Err(CoreError::validation(format!(
                "{id} has queued changes and cannot be marked synced"
            )));
        }

        let mut doc = doc.clone();
        doc.entity.meta.sync_status = status;
        if status == SyncStatus::Synced && doc.entity.meta.synced_at.is_none() {
            doc.entity.meta.synced_at = Some(now_millis());
        }
        self.commit(&mut state, JournalRecord::PutDocument(doc))
    }

    /// Records that the remote store accepted the entity at `server_version`.
    ///
    /// Once no outbox entry references the entity the remote holds its
    /// current content: the remote revision id becomes the local winning
    /// revision id and the entity becomes `Synced`. An entity that still
    /// carries losing revisions stays in `Conflict` until they are pruned.
    /// Returns whether the entity is now synced.
    pub fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        server_version: RevisionId,
    ) -> CoreResult<bool> {
        let mut state = self.state.write();
        let queued = state.has_queued(id);
        let mut doc = state.existing(kind, id)?.clone();

        doc.entity.meta.server_version = Some(server_version.clone());
        if !queued {
            doc.entity.meta.synced_at = Some(now_millis());
            doc.rev = server_version;
            if doc.conflicts.is_empty() {
                doc.entity.meta.sync_status = SyncStatus::Synced;
            }
        }
        let synced = doc.entity.meta.sync_status == SyncStatus::Synced;
        debug!(%kind, id, synced, "remote acknowledged");
        self.commit(&mut state, JournalRecord::PutDocument(doc))?;
        Ok(synced)
    }

    // ---- revisions ----

    /// Records a diverging remote revision of an entity and lets `policy`
    /// decide which side stays the winner. The loser is kept as a losing
    /// revision until it is pruned.
    pub fn record_conflict(
        &self,
        kind: EntityKind,
        rev: RevisionId,
        remote: Entity,
        policy: ConflictPolicy,
    ) -> CoreResult<Winner> {
        validate(&self.filter, kind, &remote)?;
        let mut state = self.state.write();
        self.resolve_locked(&mut state, kind, rev, remote, policy)
    }

    /// Applies a remote revision delivered by the change feed.
    ///
    /// - unknown locally: inserted as synced
    /// - already known: nothing changes
    /// - local copy synced: fast-forwarded to the remote revision
    /// - local copy has unsynced edits: resolved last-writer-wins
    pub fn apply_remote(&self, kind: EntityKind, rev: RevisionId, remote: Entity) -> CoreResult<Winner> {
        validate(&self.filter, kind, &remote)?;
        let mut state = self.state.write();

        let Some(doc) = state.doc(kind, remote.id())? else {
            debug!(%kind, id = remote.id(), %rev, "remote insert");
            let doc = StoredDocument {
                kind,
                rev,
                entity: synced(remote, None),
                conflicts: BTreeMap::new(),
            };
            self.commit(&mut state, JournalRecord::PutDocument(doc))?;
            return Ok(Winner::Remote);
        };

        if doc.rev == rev {
            return Ok(Winner::Remote);
        }
        if doc.conflicts.contains_key(&rev) {
            return Ok(Winner::Local);
        }
        if is_clean(&state, doc) {
            debug!(%kind, id = remote.id(), %rev, "remote fast-forward");
            let doc = StoredDocument {
                kind,
                rev: rev.clone(),
                entity: synced(remote, Some(&rev)),
                conflicts: doc.conflicts.clone(),
            };
            self.commit(&mut state, JournalRecord::PutDocument(doc))?;
            return Ok(Winner::Remote);
        }

        self.resolve_locked(&mut state, kind, rev, remote, ConflictPolicy::LastWriteWins)
    }

    /// Applies a remote deletion delivered by the change feed.
    ///
    /// A clean local copy becomes a synced tombstone. A local copy with
    /// unsynced edits stays the winner; the deletion is kept as a losing
    /// revision.
    pub fn apply_remote_delete(&self, kind: EntityKind, id: &str, rev: RevisionId) -> CoreResult<Winner> {
        let mut state = self.state.write();
        let Some(doc) = state.doc(kind, id)? else {
            debug!(%kind, id, %rev, "remote delete of unknown entity ignored");
            return Ok(Winner::Remote);
        };
        if doc.rev == rev {
            return Ok(Winner::Remote);
        }
        if doc.conflicts.contains_key(&rev) {
            return Ok(Winner::Local);
        }

        let now = now_millis();
        let mut tombstone = doc.entity.clone();
        tombstone.meta.is_deleted = true;
        tombstone.meta.deleted_at = Some(now);

        let mut doc = doc.clone();
        let winner = if is_clean(&state, &doc) {
            debug!(%kind, id, %rev, "remote delete applied");
            doc.entity = synced(tombstone, Some(&rev));
            doc.rev = rev;
            Winner::Remote
        } else {
            debug!(%kind, id, %rev, "remote delete lost to unsynced local edit");
            doc.conflicts.insert(rev.clone(), synced(tombstone, Some(&rev)));
            doc.entity.meta.server_version = Some(rev);
            doc.entity.meta.sync_status = SyncStatus::Conflict;
            Winner::Local
        };
        self.commit(&mut state, JournalRecord::PutDocument(doc))?;
        Ok(winner)
    }

    /// Deletes one losing revision. The winner cannot be addressed.
    ///
    /// Once the last losing revision is gone an entity in `Conflict` state
    /// becomes `Synced` if the remote acknowledged its winning revision and
    /// no outbox entry references it, `Pending` otherwise.
    pub fn remove_revision(&self, target: &PruneTarget) -> CoreResult<()> {
        let mut state = self.state.write();
        let missing = || CoreError::RevisionMissing {
            doc_id: target.doc_id().to_string(),
            rev: target.rev().clone(),
        };
        let doc = state.docs.get(target.doc_id()).ok_or_else(missing)?;
        if &doc.rev == target.rev() {
            return Err(CoreError::WinnerProtected {
                doc_id: target.doc_id().to_string(),
                rev: target.rev().clone(),
            });
        }
        if !doc.conflicts.contains_key(target.rev()) {
            return Err(missing());
        }

        let acknowledged = doc.entity.meta.server_version.as_ref() == Some(&doc.rev)
            && !state.has_queued(target.doc_id());
        let mut doc = doc.clone();
        doc.conflicts.remove(target.rev());
        if doc.conflicts.is_empty() && doc.entity.meta.sync_status == SyncStatus::Conflict {
            doc.entity.meta.sync_status = if acknowledged {
                SyncStatus::Synced
            } else {
                SyncStatus::Pending
            };
        }
        debug!(id = target.doc_id(), rev = %target.rev(), "losing revision removed");
        self.commit(&mut state, JournalRecord::PutDocument(doc))
    }

    fn resolve_locked(
        &self,
        state: &mut StoreState,
        kind: EntityKind,
        rev: RevisionId,
        remote: Entity,
        policy: ConflictPolicy,
    ) -> CoreResult<Winner> {
        let Some(doc) = state.doc(kind, remote.id())? else {
            let doc = StoredDocument {
                kind,
                rev,
                entity: synced(remote, None),
                conflicts: BTreeMap::new(),
            };
            self.commit(state, JournalRecord::PutDocument(doc))?;
            return Ok(Winner::Remote);
        };
        if doc.rev == rev {
            return Ok(Winner::Remote);
        }
        if doc.conflicts.contains_key(&rev) {
            return Ok(Winner::Local);
        }

        let local_stamp = doc.entity.version_stamp();
        let remote_stamp = VersionStamp::new(remote.meta.updated_at, true);
        let winner = policy.decide(local_stamp, remote_stamp);
        let queued = state.has_queued(remote.id());
        let mut doc = doc.clone();

        match winner {
            Winner::Local => {
                doc.conflicts.insert(rev.clone(), synced(remote, Some(&rev)));
                doc.entity.meta.server_version = Some(rev.clone());
                doc.entity.meta.sync_status = SyncStatus::Conflict;
            }
            Winner::Remote => {
                let previous = std::mem::replace(&mut doc.entity, synced(remote, Some(&rev)));
                let previous_rev = std::mem::replace(&mut doc.rev, rev.clone());
                doc.conflicts.insert(previous_rev, previous);
                if queued {
                    doc.entity.meta.sync_status = SyncStatus::Pending;
                }
            }
        }
        info!(%kind, id = doc.entity.id(), %rev, ?winner, "conflict recorded");
        self.commit(state, JournalRecord::PutDocument(doc))?;
        Ok(winner)
    }

    // ---- outbox rows ----

    /// Appends an outbox entry.
    pub fn enqueue(&self, entry: SyncQueueEntry) -> CoreResult<QueueEntryId> {
        validate_id(&self.filter, &entry.entity_id)?;
        let id = entry.id;
        let mut state = self.state.write();
        if state.queue.iter().any(|e| e.id == id) {
            return Err(CoreError::validation(format!("duplicate outbox entry {id}")));
        }
        trace!(%id, entity = %entry.entity_id, op = %entry.operation, "enqueue");
        self.commit(&mut state, JournalRecord::Enqueue(entry))?;
        Ok(id)
    }

    /// Returns the outbox in ascending `created_at` order. Entries with equal
    /// timestamps keep their enqueue order.
    pub fn queue_entries(&self) -> Vec<SyncQueueEntry> {
        let mut entries = self.state.read().queue.clone();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Returns the outbox entries of one entity, oldest first.
    pub fn queue_entries_for(&self, entity_id: &str) -> Vec<SyncQueueEntry> {
        let mut entries: Vec<_> = self
            .state
            .read()
            .queue
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        entries
    }

    /// Removes an outbox entry and returns it.
    pub fn dequeue(&self, id: QueueEntryId) -> CoreResult<SyncQueueEntry> {
        let mut state = self.state.write();
        let entry = state
            .queue
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(CoreError::QueueEntryNotFound(id))?;
        self.commit(&mut state, JournalRecord::Dequeue(id))?;
        Ok(entry)
    }

    /// Increments the attempt counter of an outbox entry and returns the new
    /// count.
    pub fn record_attempt(&self, id: QueueEntryId) -> CoreResult<u32> {
        let mut state = self.state.write();
        let attempts = state
            .queue
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.attempts.saturating_add(1))
            .ok_or(CoreError::QueueEntryNotFound(id))?;
        self.commit(&mut state, JournalRecord::Attempt(id))?;
        Ok(attempts)
    }

    /// Returns the outbox backlog.
    pub fn queue_len(&self) -> usize {
        self.state.read().queue.len()
    }

    // ---- maintenance ----

    /// Rewrites the journal as a single snapshot frame.
    pub fn compact(&self) -> CoreResult<()> {
        let state = self.state.write();
        let record = JournalRecord::Snapshot {
            docs: state.docs.values().cloned().collect(),
            queue: state.queue.clone(),
        };
        let frame = encode_frame(&record)?;

        let mut journal = self.journal.lock();
        let before = journal.size()?;
        journal.replace(&frame)?;
        info!(before, after = frame.len(), "journal compacted");
        Ok(())
    }

    fn commit(&self, state: &mut StoreState, record: JournalRecord) -> CoreResult<()> {
        let frame = encode_frame(&record)?;
        {
            let mut journal = self.journal.lock();
            let offset = journal.size()?;
            let written = journal.append(&frame).and_then(|()| {
                if self.config.sync_on_write {
                    journal.sync()
                } else {
                    Ok(())
                }
            });
            if let Err(err) = written {
                if let Err(undo) = journal.truncate(offset) {
                    warn!(%undo, "failed to roll back partial journal append");
                }
                return Err(err);
            }
        }
        trace!(record = record.label(), bytes = frame.len(), "journal append");
        state.apply(record);
        Ok(())
    }
}

#[async_trait]
impl RevisionSource for EntityStore {
    async fn scan_conflicts(&self, filter: &ReplicationFilter) -> RemoteResult<ScanReport> {
        Ok(EntityStore::scan_conflicts(self, filter))
    }

    async fn remove_revision(&self, target: &PruneTarget) -> RemoteResult<()> {
        EntityStore::remove_revision(self, target).map_err(Into::into)
    }
}

fn validate_id(filter: &ReplicationFilter, id: &str) -> CoreResult<()> {
    if id.is_empty() {
        return Err(CoreError::validation("id is empty"));
    }
    if filter.is_internal_id(id) {
        return Err(CoreError::validation(format!("{id} is in an internal namespace")));
    }
    Ok(())
}

fn validate(filter: &ReplicationFilter, kind: EntityKind, entity: &Entity) -> CoreResult<()> {
    let id = entity.id();
    validate_id(filter, id)?;
    if entity.kind() != kind {
        return Err(CoreError::KindMismatch {
            id: id.to_string(),
            expected: kind,
            found: entity.kind(),
        });
    }
    if let Some(prefixed) = filter.kind_for_id(id) {
        if prefixed != kind {
            return Err(CoreError::validation(format!(
                "{id} is in the {prefixed} namespace"
            )));
        }
    }
    if entity.meta.sync_status == SyncStatus::Synced && entity.meta.synced_at.is_none() {
        return Err(CoreError::validation(format!("{id} is synced without syncedAt")));
    }
    Ok(())
}

fn next_revision(parent: Option<&RevisionId>, entity: &Entity) -> CoreResult<RevisionId> {
    let content =
        serde_json::to_vec(&entity.to_json()?).map_err(|e| CoreError::codec(e.to_string()))?;
    Ok(RevisionId::next(parent, &content))
}

fn is_clean(state: &StoreState, doc: &StoredDocument) -> bool {
    doc.entity.meta.sync_status == SyncStatus::Synced && !state.has_queued(doc.entity.id())
}

fn synced(mut entity: Entity, rev: Option<&RevisionId>) -> Entity {
    entity.meta.sync_status = SyncStatus::Synced;
    if entity.meta.synced_at.is_none() {
        entity.meta.synced_at = Some(now_millis());
    }
    if let Some(rev) = rev {
        entity.meta.server_version = Some(rev.clone());
    }
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityBody, Project, Task, TaskStatus};
    use driftwood_protocol::Operation;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn task(id: &str, updated_at: i64, title: &str) -> Entity {
        Entity::new(id, updated_at, Task::titled(title))
    }

    fn remote_task(id: &str, updated_at: i64, title: &str) -> (RevisionId, Entity) {
        let entity = synced(task(id, updated_at, title), None);
        let rev = RevisionId::next(None, title.as_bytes());
        (rev, entity)
    }

    #[test]
    fn upsert_and_get() {
        let store = EntityStore::open_in_memory().unwrap();
        let rev = store.upsert(EntityKind::Task, task("tasks:1", 10, "a")).unwrap();
        assert_eq!(rev.generation(), 1);

        let got = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(got.meta.updated_at, 10);
        assert_eq!(store.revision(EntityKind::Task, "tasks:1").unwrap(), Some(rev.clone()));

        let rev2 = store.upsert(EntityKind::Task, task("tasks:1", 11, "b")).unwrap();
        assert_eq!(rev2.generation(), 2);
        assert_eq!(store.count(EntityKind::Task), 1);
    }

    #[test]
    fn validation_rejects_bad_documents() {
        let store = EntityStore::open_in_memory().unwrap();
        for id in ["", "_local/x", "_design/x", "projects:1"] {
            let err = store.upsert(EntityKind::Task, task(id, 1, "x")).unwrap_err();
            assert!(err.is_validation(), "{id:?}: {err}");
        }

        let err = store
            .upsert(EntityKind::Project, task("abc", 1, "x"))
            .unwrap_err();
        assert!(matches!(err, CoreError::KindMismatch { .. }));

        let mut bad = task("tasks:2", 1, "x");
        bad.meta.sync_status = SyncStatus::Synced;
        assert!(store.upsert(EntityKind::Task, bad).is_err());

        assert_eq!(store.count(EntityKind::Task), 0);
        assert_eq!(store.stats().unwrap().journal_bytes, 0);
    }

    #[test]
    fn get_with_wrong_kind_is_mismatch() {
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert(EntityKind::Task, task("abc", 1, "x")).unwrap();
        assert!(matches!(
            store.get(EntityKind::Project, "abc"),
            Err(CoreError::KindMismatch { .. })
        ));
        assert!(store.get(EntityKind::Task, "nope").unwrap().is_none());
    }

    #[test]
    fn soft_delete_keeps_tombstone() {
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert(EntityKind::Task, task("tasks:1", 1, "x")).unwrap();
        let rev = store.soft_delete(EntityKind::Task, "tasks:1").unwrap();

        let got = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert!(got.is_deleted());
        assert!(got.meta.deleted_at.is_some());
        assert_eq!(got.meta.sync_status, SyncStatus::Pending);

        assert_eq!(store.soft_delete(EntityKind::Task, "tasks:1").unwrap(), rev);
        assert!(matches!(
            store.soft_delete(EntityKind::Task, "tasks:2"),
            Err(CoreError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn index_queries_follow_updates() {
        let store = EntityStore::open_in_memory().unwrap();
        let mut t = Task::titled("a");
        t.project_id = Some("projects:1".into());
        store.upsert(EntityKind::Task, Entity::new("tasks:1", 1, t.clone())).unwrap();
        store.upsert(EntityKind::Task, Entity::new("tasks:2", 1, t.clone())).unwrap();

        let hits = store
            .query_by_index(EntityKind::Task, "projectId", "projects:1")
            .unwrap();
        assert_eq!(hits.len(), 2);

        t.status = TaskStatus::Done;
        t.project_id = None;
        store.upsert(EntityKind::Task, Entity::new("tasks:2", 2, t)).unwrap();

        let ids: Vec<_> = store
            .query_by_index(EntityKind::Task, "projectId", "projects:1")
            .unwrap()
            .into_iter()
            .map(|e| e.meta.id)
            .collect();
        assert_eq!(ids, vec!["tasks:1"]);
        assert_eq!(
            store.query_by_index(EntityKind::Task, "status", "done").unwrap().len(),
            1
        );
        assert_eq!(
            store
                .query_by_index(EntityKind::Task, "projectId", IndexValue::Null)
                .unwrap()
                .len(),
            1
        );

        store.soft_delete(EntityKind::Task, "tasks:1").unwrap();
        assert_eq!(
            store.query_by_index(EntityKind::Task, "isDeleted", true).unwrap().len(),
            1
        );
    }

    #[test]
    fn unknown_index_is_rejected() {
        let store = EntityStore::open_in_memory().unwrap();
        let err = store
            .query_by_index(EntityKind::Project, "title", "x")
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownIndex { .. }));
    }

    #[test]
    fn local_wins_keeps_remote_as_losing_revision() {
        let store = EntityStore::open_in_memory().unwrap();
        let local_rev = store.upsert(EntityKind::Task, task("tasks:1", 100, "local")).unwrap();
        let (r1, remote) = remote_task("tasks:1", 90, "remote");

        let winner = store
            .record_conflict(EntityKind::Task, r1.clone(), remote, ConflictPolicy::LastWriteWins)
            .unwrap();
        assert_eq!(winner, Winner::Local);

        let (entity, info) = store.list_conflicted(EntityKind::Task).pop().unwrap();
        assert_eq!(entity.meta.sync_status, SyncStatus::Conflict);
        assert_eq!(info.winner(), &local_rev);
        assert_eq!(info.conflict_revs(), &[r1.clone()]);
        assert!(store.losing_revision("tasks:1", &r1).is_some());

        store.remove_revision(&info.target_for(&r1).unwrap()).unwrap();
        let entity = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(entity.meta.sync_status, SyncStatus::Pending);
        assert!(store.list_conflicted(EntityKind::Task).is_empty());
    }

    #[test]
    fn remote_wins_demotes_local() {
        let store = EntityStore::open_in_memory().unwrap();
        let local_rev = store.upsert(EntityKind::Task, task("tasks:1", 50, "local")).unwrap();
        let (r1, remote) = remote_task("tasks:1", 60, "remote");

        let winner = store
            .record_conflict(EntityKind::Task, r1.clone(), remote, ConflictPolicy::LastWriteWins)
            .unwrap();
        assert_eq!(winner, Winner::Remote);
        assert_eq!(store.revision(EntityKind::Task, "tasks:1").unwrap(), Some(r1.clone()));

        let info = store.conflict_info(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(info.conflict_revs(), &[local_rev]);
        assert!(info.target_for(&r1).is_none());

        let entity = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(entity.meta.sync_status, SyncStatus::Synced);
        assert_eq!(entity.meta.server_version, Some(r1));
    }

    #[test]
    fn remove_revision_guards() {
        let store = EntityStore::open_in_memory().unwrap();
        let local_rev = store.upsert(EntityKind::Task, task("tasks:1", 100, "local")).unwrap();
        let (r1, remote) = remote_task("tasks:1", 90, "remote");
        store
            .record_conflict(EntityKind::Task, r1.clone(), remote, ConflictPolicy::LastWriteWins)
            .unwrap();
        let target = store
            .conflict_info(EntityKind::Task, "tasks:1")
            .unwrap()
            .unwrap()
            .target_for(&r1)
            .unwrap();

        store.remove_revision(&target).unwrap();
        assert!(matches!(
            store.remove_revision(&target),
            Err(CoreError::RevisionMissing { .. })
        ));
        assert_eq!(store.revision(EntityKind::Task, "tasks:1").unwrap(), Some(local_rev));
    }

    #[test]
    fn push_accepted_during_conflict_syncs_once_pruned() {
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert(EntityKind::Task, task("tasks:1", 100, "local")).unwrap();
        let (r1, remote) = remote_task("tasks:1", 90, "remote");
        store
            .record_conflict(EntityKind::Task, r1.clone(), remote, ConflictPolicy::LastWriteWins)
            .unwrap();

        let r2 = RevisionId::next(Some(&r1), b"local");
        assert!(!store.mark_synced(EntityKind::Task, "tasks:1", r2.clone()).unwrap());
        let got = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(got.meta.sync_status, SyncStatus::Conflict);
        assert_eq!(store.revision(EntityKind::Task, "tasks:1").unwrap(), Some(r2.clone()));

        // The remote echoing the accepted write is not a new conflict.
        let echo = synced(task("tasks:1", 100, "local"), None);
        assert_eq!(store.apply_remote(EntityKind::Task, r2.clone(), echo).unwrap(), Winner::Remote);
        assert_eq!(store.conflict_info(EntityKind::Task, "tasks:1").unwrap().unwrap().conflict_count(), 1);

        let target = store
            .conflict_info(EntityKind::Task, "tasks:1")
            .unwrap()
            .unwrap()
            .target_for(&r1)
            .unwrap();
        store.remove_revision(&target).unwrap();
        let got = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert_eq!(got.meta.sync_status, SyncStatus::Synced);
        assert!(got.meta.synced_at.is_some());
        assert_eq!(got.meta.server_version, Some(r2));
    }

    #[test]
    fn custom_filter_config_drives_validation() {
        let filter = driftwood_protocol::FilterConfig {
            local_marker: "~local/".into(),
            namespaces: vec![(EntityKind::Task, "todo/".into())],
            ..driftwood_protocol::FilterConfig::default()
        };
        let store = EntityStore::open(MemoryJournal::new(), StoreConfig::new().with_filter(filter)).unwrap();

        assert!(store.upsert(EntityKind::Task, task("todo/1", 1, "a")).is_ok());
        assert!(store.upsert(EntityKind::Task, task("~local/1", 1, "a")).is_err());
        assert!(matches!(
            store.upsert(EntityKind::Project, Entity::new("todo/2", 1, Project::default())),
            Err(CoreError::Validation { .. })
        ));
        assert_eq!(store.filter().kind_for_id("todo/3"), Some(EntityKind::Task));
    }

    #[test]
    fn apply_remote_paths() {
        let store = EntityStore::open_in_memory().unwrap();
        let (r1, remote) = remote_task("tasks:1", 10, "first");
        assert_eq!(store.apply_remote(EntityKind::Task, r1.clone(), remote.clone()).unwrap(), Winner::Remote);
        assert_eq!(store.apply_remote(EntityKind::Task, r1.clone(), remote).unwrap(), Winner::Remote);

        let r2 = RevisionId::next(Some(&r1), b"second");
        let second = synced(task("tasks:1", 20, "second"), None);
        store.apply_remote(EntityKind::Task, r2.clone(), second).unwrap();
        assert_eq!(store.revision(EntityKind::Task, "tasks:1").unwrap(), Some(r2));
        assert!(store.list_conflicted(EntityKind::Task).is_empty());

        store.upsert(EntityKind::Task, task("tasks:1", 30, "local edit")).unwrap();
        let r3 = RevisionId::next(None, b"stale");
        let stale = synced(task("tasks:1", 25, "stale"), None);
        assert_eq!(store.apply_remote(EntityKind::Task, r3, stale).unwrap(), Winner::Local);
        assert_eq!(store.list_conflicted(EntityKind::Task).len(), 1);
    }

    #[test]
    fn apply_remote_delete_paths() {
        let store = EntityStore::open_in_memory().unwrap();
        let (r1, remote) = remote_task("tasks:1", 10, "x");
        store.apply_remote(EntityKind::Task, r1.clone(), remote).unwrap();

        let d1 = RevisionId::next(Some(&r1), b"deleted");
        assert_eq!(
            store.apply_remote_delete(EntityKind::Task, "tasks:1", d1.clone()).unwrap(),
            Winner::Remote
        );
        let got = store.get(EntityKind::Task, "tasks:1").unwrap().unwrap();
        assert!(got.is_deleted());
        assert_eq!(got.meta.sync_status, SyncStatus::Synced);

        store.upsert(EntityKind::Task, task("tasks:2", 10, "dirty")).unwrap();
        let d2 = RevisionId::next(None, b"gone");
        assert_eq!(
            store.apply_remote_delete(EntityKind::Task, "tasks:2", d2.clone()).unwrap(),
            Winner::Local
        );
        let got = store.get(EntityKind::Task, "tasks:2").unwrap().unwrap();
        assert!(!got.is_deleted());
        assert!(store.losing_revision("tasks:2", &d2).unwrap().is_deleted());

        assert_eq!(
            store.apply_remote_delete(EntityKind::Task, "tasks:9", d2).unwrap(),
            Winner::Remote
        );
        assert!(store.get(EntityKind::Task, "tasks:9").unwrap().is_none());
    }

    #[test]
    fn mark_synced_waits_for_empty_queue() {
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert(EntityKind::Project, Entity::new("projects:1", 1, Project::default())).unwrap();
        let entry = SyncQueueEntry::new(EntityKind::Project, "projects:1", Operation::Create, json!({}), 1);
        let entry_id = store.enqueue(entry).unwrap();

        let rev = RevisionId::next(None, b"server");
        assert!(!store.mark_synced(EntityKind::Project, "projects:1", rev.clone()).unwrap());
        assert!(store
            .set_sync_status(EntityKind::Project, "projects:1", SyncStatus::Synced)
            .is_err());

        store.dequeue(entry_id).unwrap();
        assert!(store.mark_synced(EntityKind::Project, "projects:1", rev.clone()).unwrap());
        let got = store.get(EntityKind::Project, "projects:1").unwrap().unwrap();
        assert_eq!(got.meta.sync_status, SyncStatus::Synced);
        assert!(got.meta.synced_at.is_some());
        assert_eq!(store.revision(EntityKind::Project, "projects:1").unwrap(), Some(rev));
    }

    #[test]
    fn queue_is_ordered_and_counted() {
        let store = EntityStore::open_in_memory().unwrap();
        let late = SyncQueueEntry::new(EntityKind::Task, "tasks:1", Operation::Update, json!({}), 20);
        let early = SyncQueueEntry::new(EntityKind::Task, "tasks:1", Operation::Create, json!({}), 10);
        let other = SyncQueueEntry::new(EntityKind::Group, "groups:1", Operation::Create, json!({}), 10);
        let late_id = store.enqueue(late).unwrap();
        let early_id = store.enqueue(early).unwrap();
        let other_id = store.enqueue(other).unwrap();

        let order: Vec<_> = store.queue_entries().into_iter().map(|e| e.id).collect();
        assert_eq!(order, vec![early_id, other_id, late_id]);
        assert_eq!(store.queue_entries_for("tasks:1").len(), 2);

        assert_eq!(store.record_attempt(late_id).unwrap(), 1);
        assert_eq!(store.record_attempt(late_id).unwrap(), 2);
        assert_eq!(store.queue_len(), 3);

        store.dequeue(early_id).unwrap();
        assert!(matches!(
            store.dequeue(early_id),
            Err(CoreError::QueueEntryNotFound(_))
        ));
        assert_eq!(store.queue_len(), 2);
    }

    #[test]
    fn enqueue_rejects_internal_ids() {
        let store = EntityStore::open_in_memory().unwrap();
        let entry = SyncQueueEntry::new(EntityKind::Task, "_local/x", Operation::Create, json!({}), 1);
        assert!(store.enqueue(entry).unwrap_err().is_validation());
        assert_eq!(store.queue_len(), 0);
    }

    #[test]
    fn scan_skips_rejected_documents() {
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert(EntityKind::Task, task("tasks:1", 100, "a")).unwrap();
        store.upsert(EntityKind::Task, task("tasks:2", 100, "b")).unwrap();
        let (r1, remote) = remote_task("tasks:1", 90, "r");
        store
            .record_conflict(EntityKind::Task, r1, remote, ConflictPolicy::LastWriteWins)
            .unwrap();

        let report = store.scan_conflicts(&ReplicationFilter::default());
        assert_eq!(report.documents_checked, 2);
        assert_eq!(report.conflict_count(), 1);

        let narrow = ReplicationFilter::new(driftwood_protocol::FilterConfig {
            namespaces: Vec::new(),
            type_names: Vec::new(),
            ..Default::default()
        });
        assert_eq!(store.scan_conflicts(&narrow), ScanReport::default());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");
        let entry_id;
        {
            let store = EntityStore::open_path(&path, StoreConfig::default()).unwrap();
            store.upsert(EntityKind::Task, task("tasks:1", 100, "a")).unwrap();
            let (r1, remote) = remote_task("tasks:1", 90, "r");
            store
                .record_conflict(EntityKind::Task, r1, remote, ConflictPolicy::LastWriteWins)
                .unwrap();
            let entry = SyncQueueEntry::new(EntityKind::Task, "tasks:1", Operation::Create, json!({}), 1);
            entry_id = store.enqueue(entry).unwrap();
            store.record_attempt(entry_id).unwrap();
        }

        let store = EntityStore::open_path(&path, StoreConfig::default()).unwrap();
        assert_eq!(store.count(EntityKind::Task), 1);
        assert_eq!(store.list_conflicted(EntityKind::Task).len(), 1);
        let entries = store.queue_entries();
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].attempts, 1);
        assert_eq!(
            store.query_by_index(EntityKind::Task, "syncStatus", "conflict").unwrap().len(),
            1
        );
    }

    #[test]
    fn torn_tail_is_discarded_on_open() {
        let journal = MemoryJournal::new();
        {
            let store = EntityStore::open(journal.clone(), StoreConfig::default()).unwrap();
            store.upsert(EntityKind::Task, task("tasks:1", 1, "a")).unwrap();
            store.upsert(EntityKind::Task, task("tasks:2", 1, "b")).unwrap();
        }
        let mut bytes = journal.data();
        bytes.truncate(bytes.len() - 3);
        let torn = MemoryJournal::with_data(bytes);

        let store = EntityStore::open(torn.clone(), StoreConfig::default()).unwrap();
        assert_eq!(store.count(EntityKind::Task), 1);
        store.upsert(EntityKind::Task, task("tasks:3", 1, "c")).unwrap();

        let reopened = EntityStore::open(torn, StoreConfig::default()).unwrap();
        assert_eq!(reopened.count(EntityKind::Task), 2);
    }

    #[test]
    fn compact_preserves_state() {
        let journal = MemoryJournal::new();
        let store = EntityStore::open(journal.clone(), StoreConfig::default()).unwrap();
        for i in 0..10 {
            store.upsert(EntityKind::Task, task("tasks:1", i, "a")).unwrap();
        }
        let entry = SyncQueueEntry::new(EntityKind::Task, "tasks:1", Operation::Update, json!({}), 1);
        store.enqueue(entry).unwrap();

        let before = journal.data().len();
        store.compact().unwrap();
        assert!(journal.data().len() < before);

        let reopened = EntityStore::open(journal, StoreConfig::default()).unwrap();
        assert_eq!(reopened.get(EntityKind::Task, "tasks:1").unwrap().unwrap().meta.updated_at, 9);
        assert_eq!(reopened.queue_len(), 1);
    }

    #[test]
    fn compacts_on_open_past_threshold() {
        let journal = MemoryJournal::new();
        {
            let store = EntityStore::open(journal.clone(), StoreConfig::default()).unwrap();
            for i in 0..5 {
                store.upsert(EntityKind::Task, task("tasks:1", i, "a")).unwrap();
            }
        }
        let before = journal.data().len();
        let config = StoreConfig::new().compact_after_frames(3);
        let store = EntityStore::open(journal.clone(), config).unwrap();
        assert!(journal.data().len() < before);
        assert_eq!(store.count(EntityKind::Task), 1);
    }

    #[tokio::test]
    async fn revision_source_maps_errors() {
        let store = EntityStore::open_in_memory().unwrap();
        store.upsert(EntityKind::Task, task("tasks:1", 100, "a")).unwrap();
        let (r1, remote) = remote_task("tasks:1", 90, "r");
        store
            .record_conflict(EntityKind::Task, r1.clone(), remote, ConflictPolicy::LastWriteWins)
            .unwrap();

        let source: &dyn RevisionSource = &store;
        let report = source.scan_conflicts(&ReplicationFilter::default()).await.unwrap();
        let target = report.candidates[0].info.target_for(&r1).unwrap();
        source.remove_revision(&target).await.unwrap();
        let err = source.remove_revision(&target).await.unwrap_err();
        assert!(err.is_missing_revision());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put { slot: u8, status: TaskStatus },
        Delete { slot: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let status = prop::sample::select(vec![
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Done,
        ]);
        prop_oneof![
            (0u8..6, status).prop_map(|(slot, status)| Op::Put { slot, status }),
            (0u8..6).prop_map(|slot| Op::Delete { slot }),
        ]
    }

    fn status_of(entity: &Entity) -> TaskStatus {
        match &entity.body {
            EntityBody::Task(task) => task.status,
            other => panic!("not a task: {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn indexes_and_replay_agree_with_writes(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let journal = MemoryJournal::new();
            let store = EntityStore::open(journal.clone(), StoreConfig::default()).unwrap();
            let mut deleted: HashMap<u8, bool> = HashMap::new();

            for (step, op) in ops.iter().enumerate() {
                match *op {
                    Op::Put { slot, status } => {
                        if deleted.get(&slot) == Some(&true) {
                            continue;
                        }
                        let body = Task { status, ..Task::titled("t") };
                        let id = EntityKind::Task.make_id(&slot.to_string());
                        store.upsert(EntityKind::Task, Entity::new(id, step as i64, body)).unwrap();
                        deleted.insert(slot, false);
                    }
                    Op::Delete { slot } => {
                        if deleted.get(&slot) != Some(&false) {
                            continue;
                        }
                        let id = EntityKind::Task.make_id(&slot.to_string());
                        store.soft_delete(EntityKind::Task, &id).unwrap();
                        deleted.insert(slot, true);
                    }
                }
            }

            let all = store.list(EntityKind::Task);
            prop_assert_eq!(all.len(), deleted.len());
            for status in [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done] {
                let mut by_index: Vec<String> = store
                    .query_by_index(EntityKind::Task, "status", status.as_str())
                    .unwrap()
                    .iter()
                    .map(|e| e.id().to_string())
                    .collect();
                by_index.sort();
                let mut by_scan: Vec<String> = all
                    .iter()
                    .filter(|e| status_of(e) == status)
                    .map(|e| e.id().to_string())
                    .collect();
                by_scan.sort();
                prop_assert_eq!(by_index, by_scan);
            }
            let tombstones = store.query_by_index(EntityKind::Task, "isDeleted", true).unwrap();
            prop_assert_eq!(tombstones.len(), deleted.values().filter(|d| **d).count());

            drop(store);
            let reopened = EntityStore::open(journal, StoreConfig::default()).unwrap();
            prop_assert_eq!(reopened.list(EntityKind::Task), all);
        }
    }
}
