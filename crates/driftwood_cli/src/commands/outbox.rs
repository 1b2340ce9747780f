//! Outbox command implementation.

use super::{open_store, CommandResult};
use driftwood_protocol::SyncQueueEntry;
use std::path::Path;

/// Runs the outbox command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let entries = open_store(path)?.queue_entries();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text(&entries),
    }
    Ok(())
}

fn print_text(entries: &[SyncQueueEntry]) {
    if entries.is_empty() {
        println!("Outbox is empty.");
        return;
    }
    println!(
        "{:<36}  {:<13}  {:<7}  {:>8}  {:>14}",
        "ENTRY", "TYPE", "OP", "ATTEMPTS", "CREATED"
    );
    for entry in entries {
        println!(
            "{:<36}  {:<13}  {:<7}  {:>8}  {:>14}  {}",
            entry.id,
            entry.entity_type,
            entry.operation,
            entry.attempts,
            entry.created_at,
            entry.entity_id
        );
    }
    println!();
    println!("{} pending change(s)", entries.len());
}
