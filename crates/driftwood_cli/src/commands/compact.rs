//! Compact command implementation.

use super::{open_store, CommandResult};
use std::path::Path;
use tracing::info;

/// Runs the compact command.
pub fn run(path: &Path) -> CommandResult<()> {
    let (before, after) = compact(path)?;
    println!("Compacted {}", path.display());
    println!("  before: {before} bytes");
    println!("  after:  {after} bytes");
    Ok(())
}

/// Rewrites the journal and returns its size before and after.
pub fn compact(path: &Path) -> CommandResult<(u64, u64)> {
    let store = open_store(path)?;
    let before = store.stats()?.journal_bytes;
    store.compact()?;
    let after = store.stats()?.journal_bytes;
    info!(before, after, "journal compacted");
    Ok((before, after))
}
