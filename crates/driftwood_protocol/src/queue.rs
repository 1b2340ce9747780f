//! Outbox entry types.

use crate::kind::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueEntryId(uuid::Uuid);

impl QueueEntryId {
    /// Creates a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of mutation recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was soft-deleted.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// A pending mutation awaiting delivery to the remote store.
///
/// Entries for the same entity are delivered in `created_at` order. The core
/// never reorders or coalesces them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    /// Entry id.
    pub id: QueueEntryId,
    /// Kind of the mutated entity.
    pub entity_type: EntityKind,
    /// Id of the mutated entity.
    pub entity_id: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Snapshot of the entity fields at enqueue time.
    pub payload: Value,
    /// Enqueue time in milliseconds.
    pub created_at: i64,
    /// Delivery attempts so far.
    pub attempts: u32,
}

impl SyncQueueEntry {
    /// Creates a fresh entry with zero attempts.
    pub fn new(
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        operation: Operation,
        payload: Value,
        created_at: i64,
    ) -> Self {
        Self {
            id: QueueEntryId::new(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            payload,
            created_at,
            attempts: 0,
        }
    }
}
