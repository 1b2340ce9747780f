//! Revision-aware documents as exchanged with the remote store.

use crate::revision::RevisionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One revision of a document held by the remote store.
///
/// The body is the JSON snapshot of the entity at that revision. Metadata the
/// core needs for routing and resolution (`type`, `updatedAt`, `syncStatus`)
/// is read out of the body rather than duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision of this snapshot.
    #[serde(rename = "_rev")]
    pub rev: RevisionId,
    /// Whether this revision is a deletion.
    #[serde(rename = "_deleted", default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Entity snapshot.
    pub body: Value,
}

impl RemoteDocument {
    /// Creates a document revision.
    pub fn new(id: impl Into<String>, rev: RevisionId, body: Value) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: false,
            body,
        }
    }

    /// Creates a deletion revision.
    pub fn tombstone(id: impl Into<String>, rev: RevisionId) -> Self {
        Self {
            id: id.into(),
            rev,
            deleted: true,
            body: Value::Null,
        }
    }

    /// Returns the explicit `type` field of the body, if any.
    pub fn doc_type(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// Returns the `updatedAt` field of the body, or 0 if absent.
    pub fn updated_at(&self) -> i64 {
        self.body
            .get("updatedAt")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}
