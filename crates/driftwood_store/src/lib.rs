//! # Driftwood Store
//!
//! The device-local entity store every other Driftwood component reads and
//! writes.
//!
//! This crate provides:
//! - Typed entities ([`Entity`]) over a closed set of kinds
//! - Fixed per-kind secondary indexes
//! - Revision bookkeeping: one winning revision plus losing revisions per
//!   document
//! - Persisted outbox rows
//! - An append-only journal with file and in-memory backends
//!
//! ## Durability
//!
//! Every write is encoded as one journal frame and appended before the
//! in-memory state changes. A write whose append fails leaves the store
//! exactly as it was. Opening a store replays the journal.
//!
//! ## Example
//!
//! ```rust
//! use driftwood_store::{Entity, EntityStore, Task};
//! use driftwood_protocol::EntityKind;
//!
//! let store = EntityStore::open_in_memory().unwrap();
//! let task = Entity::new("tasks:1", 100, Task::titled("Water the plants"));
//! store.upsert(EntityKind::Task, task).unwrap();
//! assert!(store.get(EntityKind::Task, "tasks:1").unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod journal;
mod store;

pub use config::StoreConfig;
pub use entity::{
    indexed_fields, Entity, EntityBody, Group, IndexValue, Project, SyncMeta, SyncStatus, Task,
    TaskStatus, TimerSession,
};
pub use error::{CoreError, CoreResult};
pub use journal::{FileJournal, JournalBackend, MemoryJournal};
pub use store::{EntityStore, StoreStats};
