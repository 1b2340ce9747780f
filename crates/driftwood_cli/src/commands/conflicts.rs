//! Conflicts command implementation.

use super::{open_store, CommandResult};
use driftwood_protocol::EntityKind;
use std::path::Path;

/// Runs the conflicts command.
pub fn run(path: &Path, kind: Option<&str>) -> CommandResult<()> {
    let kinds = match kind {
        Some(name) => vec![EntityKind::from_type_name(name)
            .ok_or_else(|| format!("Unknown entity type: {name}"))?],
        None => EntityKind::ALL.to_vec(),
    };

    let store = open_store(path)?;
    let mut total = 0;
    for kind in kinds {
        for (entity, info) in store.list_conflicted(kind) {
            total += info.conflict_count();
            println!("{} ({kind})", info.doc_id());
            println!("  winner   {}  updatedAt={}", info.winner(), entity.meta.updated_at);
            for rev in info.conflict_revs() {
                match store.losing_revision(info.doc_id(), rev) {
                    Some(losing) => println!("  losing   {rev}  updatedAt={}", losing.meta.updated_at),
                    None => println!("  losing   {rev}"),
                }
            }
        }
    }

    if total == 0 {
        println!("No conflicts.");
    } else {
        println!();
        println!("{total} losing revision(s)");
    }
    Ok(())
}
