//! Inspect command implementation.

use super::{open_store, CommandResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Journal path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Documents per entity type, soft-deleted ones included.
    pub documents: BTreeMap<String, usize>,
    /// Soft-deleted documents.
    pub deleted: usize,
    /// Documents carrying losing revisions.
    pub conflicted: usize,
    /// Losing revisions across all documents.
    pub losing_revisions: usize,
    /// Outbox backlog.
    pub pending: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    let result = inspect(path)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

/// Collects statistics about the store at `path`.
pub fn inspect(path: &Path) -> CommandResult<InspectResult> {
    let stats = open_store(path)?.stats()?;
    Ok(InspectResult {
        path: path.display().to_string(),
        journal_bytes: stats.journal_bytes,
        documents: stats
            .documents
            .into_iter()
            .map(|(kind, count)| (kind.type_name().to_string(), count))
            .collect(),
        deleted: stats.deleted,
        conflicted: stats.conflicted,
        losing_revisions: stats.losing_revisions,
        pending: stats.queue_len,
    })
}

fn print_text(result: &InspectResult) {
    println!("Driftwood Store Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!("Journal: {}", format_size(result.journal_bytes));
    println!();
    println!("Documents:");
    if result.documents.is_empty() {
        println!("  (none)");
    }
    for (kind, count) in &result.documents {
        println!("  {kind:<14} {count}");
    }
    println!("  deleted        {}", result.deleted);
    println!();
    println!("Conflicted documents: {}", result.conflicted);
    println!("Losing revisions:     {}", result.losing_revisions);
    println!("Pending changes:      {}", result.pending);
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
