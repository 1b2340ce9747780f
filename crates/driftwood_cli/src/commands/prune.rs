//! Prune command implementation.

use super::{open_store, CommandResult};
use driftwood_engine::{AlwaysVisible, PruneConfig, PruneResult, PruneScheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Runs the prune command.
pub fn run(path: &Path, dry_run: bool, limit: usize) -> CommandResult<()> {
    if dry_run {
        let store = open_store(path)?;
        let report = store.scan_conflicts(store.filter());
        println!("Documents checked: {}", report.documents_checked);
        for candidate in &report.candidates {
            println!(
                "  {}: {} losing revision(s)",
                candidate.info.doc_id(),
                candidate.info.conflict_count()
            );
        }
        println!("Would prune {} revision(s)", report.conflict_count().min(limit));
        return Ok(());
    }

    let result = prune(path, limit)?;
    println!("Documents checked: {}", result.documents_checked);
    println!("Conflicts found:   {}", result.conflicts_found);
    println!("Pruned:            {}", result.conflicts_pruned);
    println!("Already resolved:  {}", result.already_resolved);
    println!("Deferred:          {}", result.deferred);
    for error in &result.errors {
        println!("  error: {error}");
    }
    Ok(())
}

/// Runs one pruning pass over the store at `path`.
pub fn prune(path: &Path, limit: usize) -> CommandResult<PruneResult> {
    let store = Arc::new(open_store(path)?);
    let config = PruneConfig::default()
        .with_min_interval(Duration::ZERO)
        .with_max_conflicts_per_run(limit);
    let filter = store.filter().clone();
    let scheduler = PruneScheduler::with_filter(store, config, filter, Arc::new(AlwaysVisible));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(scheduler.run_now()))
}
