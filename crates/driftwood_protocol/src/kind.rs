//! Entity kinds that take part in replication.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a syncable entity.
///
/// Each kind replicates under its own id namespace (`tasks:`, `projects:`, ...)
/// and has a type name used by documents that carry an explicit `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// A task.
    Task,
    /// A project grouping tasks.
    Project,
    /// A group of projects.
    Group,
    /// A recorded timer session.
    TimerSession,
}

impl EntityKind {
    /// All kinds, in schema order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Task,
        EntityKind::Project,
        EntityKind::Group,
        EntityKind::TimerSession,
    ];

    /// Returns the type name carried in a document's `type` field.
    pub const fn type_name(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Project => "project",
            EntityKind::Group => "group",
            EntityKind::TimerSession => "timerSession",
        }
    }

    /// Returns the default id namespace prefix for this kind.
    pub const fn namespace(self) -> &'static str {
        match self {
            EntityKind::Task => "tasks:",
            EntityKind::Project => "projects:",
            EntityKind::Group => "groups:",
            EntityKind::TimerSession => "timerSessions:",
        }
    }

    /// Parses a type name.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }

    /// Finds the kind whose default namespace prefixes `id`.
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| id.starts_with(kind.namespace()))
    }

    /// Builds a namespaced id for this kind.
    pub fn make_id(self, local_part: &str) -> String {
        format!("{}{}", self.namespace(), local_part)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}
