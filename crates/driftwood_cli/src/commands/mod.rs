//! CLI command implementations.

pub mod classify;
pub mod compact;
pub mod conflicts;
pub mod inspect;
pub mod outbox;
pub mod prune;

use driftwood_store::{EntityStore, StoreConfig};
use std::path::Path;

/// Error type shared by the commands.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing store. Refuses to create a new journal.
pub fn open_store(path: &Path) -> CommandResult<EntityStore> {
    if !path.is_file() {
        return Err(format!("No journal found at {path:?}").into());
    }
    Ok(EntityStore::open_path(path, StoreConfig::default())?)
}
