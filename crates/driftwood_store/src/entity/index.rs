//! Fixed secondary index fields per entity kind.

use super::model::{Entity, EntityBody};
use driftwood_protocol::EntityKind;
use std::fmt;

const TASK_FIELDS: &[&str] = &[
    "status",
    "projectId",
    "dueDate",
    "syncStatus",
    "updatedAt",
    "isDeleted",
];
const PROJECT_FIELDS: &[&str] = &["groupId", "archived", "syncStatus", "updatedAt", "isDeleted"];
const GROUP_FIELDS: &[&str] = &["syncStatus", "updatedAt", "isDeleted"];
const TIMER_SESSION_FIELDS: &[&str] = &["taskId", "syncStatus", "updatedAt", "isDeleted"];

/// Returns the indexed fields of `kind`.
pub fn indexed_fields(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Task => TASK_FIELDS,
        EntityKind::Project => PROJECT_FIELDS,
        EntityKind::Group => GROUP_FIELDS,
        EntityKind::TimerSession => TIMER_SESSION_FIELDS,
    }
}

/// An indexable field value.
///
/// Values order `Null < Bool < Int < Text`, so range scans over one field
/// stay within a single variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexValue {
    /// Field absent.
    Null,
    /// Boolean field.
    Bool(bool),
    /// Integer field.
    Int(i64),
    /// String field.
    Text(String),
}

impl From<bool> for IndexValue {
    fn from(v: bool) -> Self {
        IndexValue::Bool(v)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Text(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Text(v)
    }
}

impl<T: Into<IndexValue>> From<Option<T>> for IndexValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(IndexValue::Null, Into::into)
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Null => f.write_str("null"),
            IndexValue::Bool(v) => write!(f, "{v}"),
            IndexValue::Int(v) => write!(f, "{v}"),
            IndexValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl Entity {
    /// Extracts the value of an indexed field. Returns `None` if `field` is
    /// not indexed for this entity's kind.
    pub fn index_value(&self, field: &str) -> Option<IndexValue> {
        let meta = &self.meta;
        let common = match field {
            "syncStatus" => Some(IndexValue::from(meta.sync_status.as_str())),
            "updatedAt" => Some(IndexValue::Int(meta.updated_at)),
            "isDeleted" => Some(IndexValue::Bool(meta.is_deleted)),
            _ => None,
        };
        if common.is_some() {
            return common;
        }

        match (&self.body, field) {
            (EntityBody::Task(t), "status") => Some(t.status.as_str().into()),
            (EntityBody::Task(t), "projectId") => Some(t.project_id.as_deref().into()),
            (EntityBody::Task(t), "dueDate") => Some(t.due_date.as_deref().into()),
            (EntityBody::Project(p), "groupId") => Some(p.group_id.as_deref().into()),
            (EntityBody::Project(p), "archived") => Some(p.archived.into()),
            (EntityBody::TimerSession(s), "taskId") => Some(s.task_id.as_deref().into()),
            _ => None,
        }
    }
}
