//! Driftwood CLI
//!
//! Command-line tools for Driftwood store maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `outbox` - List pending outbox entries
//! - `conflicts` - List documents with losing revisions
//! - `classify` - Show how the replication filter sees a document id
//! - `prune` - Delete losing revisions
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Driftwood command-line store tools.
#[derive(Parser)]
#[command(name = "driftwood")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store journal
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending outbox entries, oldest first
    Outbox {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List documents with losing revisions
    Conflicts {
        /// Only this entity type (task, project, group, timerSession)
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show how the replication filter classifies a document
    Classify {
        /// Document id
        id: String,

        /// Explicit `type` field of the document
        #[arg(short = 't', long = "type")]
        doc_type: Option<String>,
    },

    /// Delete losing revisions
    Prune {
        /// Only report what would be pruned
        #[arg(short, long)]
        dry_run: bool,

        /// Maximum number of losing revisions to delete
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Rewrite the journal as a single snapshot
    Compact,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Outbox { format } => {
            let path = cli.path.ok_or("Journal path required for outbox")?;
            commands::outbox::run(&path, &format)?;
        }
        Commands::Conflicts { kind } => {
            let path = cli.path.ok_or("Journal path required for conflicts")?;
            commands::conflicts::run(&path, kind.as_deref())?;
        }
        Commands::Classify { id, doc_type } => {
            commands::classify::run(&id, doc_type.as_deref());
        }
        Commands::Prune { dry_run, limit } => {
            let path = cli.path.ok_or("Journal path required for prune")?;
            commands::prune::run(&path, dry_run, limit)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path)?;
        }
        Commands::Version => {
            println!("Driftwood CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
