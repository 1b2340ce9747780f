//! Journal record types.

use crate::store::StoredDocument;
use driftwood_protocol::{QueueEntryId, SyncQueueEntry};
use serde::{Deserialize, Serialize};

/// One logical store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum JournalRecord {
    /// Full new state of one document, losing revisions included.
    PutDocument(StoredDocument),
    /// A new outbox row.
    Enqueue(SyncQueueEntry),
    /// An outbox row was delivered or dropped.
    Dequeue(QueueEntryId),
    /// A delivery attempt failed.
    Attempt(QueueEntryId),
    /// Complete state, written as the only frame after compaction.
    Snapshot {
        docs: Vec<StoredDocument>,
        queue: Vec<SyncQueueEntry>,
    },
}

impl JournalRecord {
    /// Short name for logs.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            JournalRecord::PutDocument(_) => "put",
            JournalRecord::Enqueue(_) => "enqueue",
            JournalRecord::Dequeue(_) => "dequeue",
            JournalRecord::Attempt(_) => "attempt",
            JournalRecord::Snapshot { .. } => "snapshot",
        }
    }
}
