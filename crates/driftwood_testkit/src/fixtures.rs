//! Store fixtures and entity builders.

use driftwood_protocol::{RemoteDocument, RevisionId};
use driftwood_store::{
    Entity, EntityStore, Group, MemoryJournal, Project, StoreConfig, SyncStatus, Task,
    TimerSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<EntityStore>,
    journal: Option<MemoryJournal>,
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        let journal = MemoryJournal::new();
        let store = EntityStore::open(journal.clone(), StoreConfig::default())
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            journal: Some(journal),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a new store journaled to a temporary file.
    pub fn file() -> Self {
        Self::file_with_config(StoreConfig::default())
    }

    /// Creates a new file-backed store with `config`.
    pub fn file_with_config(config: StoreConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("driftwood.journal");
        let store = EntityStore::open_path(&path, config).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            journal: None,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the journal path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a shared handle to the store.
    pub fn handle(&self) -> Arc<EntityStore> {
        Arc::clone(&self.store)
    }

    /// Drops the store and opens it again from the same journal.
    pub fn reopen(self) -> Self {
        let config = self.store.config().clone();
        let Self {
            store,
            journal,
            path,
            _temp_dir,
        } = self;
        drop(store);

        let store = match (&journal, &path) {
            (Some(journal), _) => EntityStore::open(journal.clone(), config),
            (None, Some(path)) => EntityStore::open_path(path, config),
            (None, None) => unreachable!("test store has neither journal nor path"),
        }
        .expect("Failed to reopen store");

        Self {
            store: Arc::new(store),
            journal,
            path,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = EntityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&EntityStore) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store)
}

/// A pending task titled after its id.
pub fn task(id: &str, updated_at: i64) -> Entity {
    Entity::new(id, updated_at, Task::titled(id))
}

/// A pending project named after its id.
pub fn project(id: &str, updated_at: i64) -> Entity {
    Entity::new(
        id,
        updated_at,
        Project {
            name: id.to_string(),
            ..Project::default()
        },
    )
}

/// A pending group named after its id.
pub fn group(id: &str, updated_at: i64) -> Entity {
    Entity::new(
        id,
        updated_at,
        Group {
            name: id.to_string(),
            ..Group::default()
        },
    )
}

/// A pending, still running timer session.
pub fn timer_session(id: &str, started_at: i64) -> Entity {
    Entity::new(
        id,
        started_at,
        TimerSession {
            started_at,
            ..TimerSession::default()
        },
    )
}

/// Marks `entity` synced at `at`.
pub fn synced(mut entity: Entity, at: i64) -> Entity {
    entity.meta.sync_status = SyncStatus::Synced;
    entity.meta.synced_at = Some(at);
    entity
}

/// Renders `entity` as a remote revision on top of `parent`.
pub fn remote_revision(entity: &Entity, parent: Option<&RevisionId>) -> RemoteDocument {
    let body = entity
        .to_remote_body()
        .expect("Failed to render remote body");
    let content = serde_json::to_vec(&body).expect("Failed to encode remote body");
    RemoteDocument::new(entity.id(), RevisionId::next(parent, &content), body)
}
