//! Entity model and index extraction.

mod index;
mod model;

pub use index::{indexed_fields, IndexValue};
pub use model::{
    Entity, EntityBody, Group, Project, SyncMeta, SyncStatus, Task, TaskStatus, TimerSession,
};
