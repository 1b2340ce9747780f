//! Typed entity model.

use crate::error::{CoreError, CoreResult};
use driftwood_protocol::{EntityKind, FilterSubject, RemoteDocument, RevisionId, VersionStamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Replication state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// The latest write is confirmed by the remote store.
    Synced,
    /// The latest write is waiting in the outbox.
    #[default]
    Pending,
    /// A diverging remote revision is outstanding.
    Conflict,
    /// The write could not be queued or delivered.
    Error,
}

impl SyncStatus {
    /// Returns the wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }
}

/// Sync metadata shared by every entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncMeta {
    /// Stable, client-generated id.
    pub id: String,
    /// Wall-clock time of the last edit in milliseconds.
    pub updated_at: i64,
    /// Replication state.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// When the remote store last confirmed this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<i64>,
    /// Revision last acknowledged by the remote store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<RevisionId>,
    /// Soft-delete marker.
    #[serde(default)]
    pub is_deleted: bool,
    /// When the entity was soft-deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

const META_FIELDS: [&str; 7] = [
    "id",
    "updatedAt",
    "syncStatus",
    "syncedAt",
    "serverVersion",
    "isDeleted",
    "deletedAt",
];

/// Meta fields that only make sense on this device.
const DEVICE_FIELDS: [&str; 3] = ["syncStatus", "syncedAt", "serverVersion"];

/// Progress of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// Returns the wire name of the status.
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "inProgress",
            TaskStatus::Done => "done",
        }
    }
}

/// A task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Task {
    /// Title.
    pub title: String,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Progress.
    #[serde(default)]
    pub status: TaskStatus,
    /// Owning project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Due date (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    /// Completion time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl Task {
    /// Creates a to-do task with the given title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// A project.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Project {
    /// Display name.
    pub name: String,
    /// Display color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Owning group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Archived projects are hidden but still replicate.
    #[serde(default)]
    pub archived: bool,
}

/// A group of projects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Group {
    /// Display name.
    pub name: String,
    /// Position among groups.
    #[serde(default)]
    pub sort_order: i64,
}

/// A recorded timer session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimerSession {
    /// Task the time was spent on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Start time in milliseconds.
    pub started_at: i64,
    /// End time in milliseconds; `None` while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// Free-form label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Kind-specific fields of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityBody {
    /// A task.
    Task(Task),
    /// A project.
    Project(Project),
    /// A group.
    Group(Group),
    /// A timer session.
    TimerSession(TimerSession),
}

impl EntityBody {
    /// Returns the kind of this body.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityBody::Task(_) => EntityKind::Task,
            EntityBody::Project(_) => EntityKind::Project,
            EntityBody::Group(_) => EntityKind::Group,
            EntityBody::TimerSession(_) => EntityKind::TimerSession,
        }
    }
}

impl From<Task> for EntityBody {
    fn from(task: Task) -> Self {
        EntityBody::Task(task)
    }
}

impl From<Project> for EntityBody {
    fn from(project: Project) -> Self {
        EntityBody::Project(project)
    }
}

impl From<Group> for EntityBody {
    fn from(group: Group) -> Self {
        EntityBody::Group(group)
    }
}

impl From<TimerSession> for EntityBody {
    fn from(session: TimerSession) -> Self {
        EntityBody::TimerSession(session)
    }
}

/// A syncable record: sync metadata plus kind-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Sync metadata.
    pub meta: SyncMeta,
    /// Kind-specific fields.
    pub body: EntityBody,
}

impl Entity {
    /// Creates a pending entity edited at `updated_at`.
    pub fn new(id: impl Into<String>, updated_at: i64, body: impl Into<EntityBody>) -> Self {
        Self {
            meta: SyncMeta {
                id: id.into(),
                updated_at,
                sync_status: SyncStatus::Pending,
                synced_at: None,
                server_version: None,
                is_deleted: false,
                deleted_at: None,
            },
            body: body.into(),
        }
    }

    /// Returns the entity id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Returns the entity kind.
    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    /// Returns true if the entity is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.meta.is_deleted
    }

    /// Returns the fields taking part in conflict resolution.
    pub fn version_stamp(&self) -> VersionStamp {
        VersionStamp::new(
            self.meta.updated_at,
            self.meta.sync_status == SyncStatus::Synced,
        )
    }

    /// Renders the entity as a flat JSON document with a `type` field.
    pub fn to_json(&self) -> CoreResult<Value> {
        let mut object = to_object(&self.meta)?;
        let body = match &self.body {
            EntityBody::Task(task) => to_object(task)?,
            EntityBody::Project(project) => to_object(project)?,
            EntityBody::Group(group) => to_object(group)?,
            EntityBody::TimerSession(session) => to_object(session)?,
        };
        object.extend(body);
        object.insert("type".into(), Value::String(self.kind().type_name().into()));
        Ok(Value::Object(object))
    }

    /// Parses a flat JSON document. Unknown fields are rejected.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(CoreError::validation("document is not an object"));
        };

        let kind = match object.remove("type") {
            Some(Value::String(name)) => EntityKind::from_type_name(&name)
                .ok_or_else(|| CoreError::validation(format!("unknown type {name:?}")))?,
            Some(_) => return Err(CoreError::validation("type must be a string")),
            None => {
                let id = object.get("id").and_then(Value::as_str).unwrap_or_default();
                EntityKind::from_id(id)
                    .ok_or_else(|| CoreError::validation("document has no type"))?
            }
        };

        let mut meta = Map::new();
        for field in META_FIELDS {
            if let Some(value) = object.remove(field) {
                meta.insert(field.to_string(), value);
            }
        }
        let meta: SyncMeta = from_object(meta)?;

        let body = match kind {
            EntityKind::Task => EntityBody::Task(from_object(object)?),
            EntityKind::Project => EntityBody::Project(from_object(object)?),
            EntityKind::Group => EntityBody::Group(from_object(object)?),
            EntityKind::TimerSession => EntityBody::TimerSession(from_object(object)?),
        };

        Ok(Self { meta, body })
    }
}

impl Entity {
    /// Renders the body pushed to the remote store, without device-local
    /// sync fields.
    pub fn to_remote_body(&self) -> CoreResult<Value> {
        let mut json = self.to_json()?;
        if let Value::Object(object) = &mut json {
            for field in DEVICE_FIELDS {
                object.remove(field);
            }
        }
        Ok(json)
    }

    /// Builds the local form of a remote revision, marked synced at
    /// `synced_at` and acknowledged at `doc.rev`.
    pub fn from_remote(doc: &RemoteDocument, synced_at: i64) -> CoreResult<Self> {
        if doc.deleted {
            return Err(CoreError::validation(format!(
                "{} at {} is a deletion and has no body",
                doc.id, doc.rev
            )));
        }
        let Value::Object(mut object) = doc.body.clone() else {
            return Err(CoreError::validation(format!("{} has no object body", doc.id)));
        };
        for field in DEVICE_FIELDS {
            object.remove(field);
        }
        match object.get("id").and_then(Value::as_str) {
            Some(id) if id != doc.id => {
                return Err(CoreError::validation(format!(
                    "body id {id:?} does not match {:?}",
                    doc.id
                )));
            }
            Some(_) => {}
            None => {
                object.insert("id".into(), Value::String(doc.id.clone()));
            }
        }

        let mut entity = Self::from_json(Value::Object(object))?;
        entity.meta.sync_status = SyncStatus::Synced;
        entity.meta.synced_at = Some(synced_at);
        entity.meta.server_version = Some(doc.rev.clone());
        Ok(entity)
    }
}

impl FilterSubject for Entity {
    fn doc_id(&self) -> Option<&str> {
        Some(&self.meta.id)
    }

    fn doc_type(&self) -> Option<&str> {
        Some(self.kind().type_name())
    }
}

fn to_object<T: Serialize>(value: &T) -> CoreResult<Map<String, Value>> {
    match serde_json::to_value(value) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(CoreError::codec("expected a JSON object")),
        Err(e) => Err(CoreError::codec(e.to_string())),
    }
}

fn from_object<T: for<'de> Deserialize<'de>>(object: Map<String, Value>) -> CoreResult<T> {
    serde_json::from_value(Value::Object(object)).map_err(|e| CoreError::validation(e.to_string()))
}
