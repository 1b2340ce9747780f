//! # Driftwood Protocol
//!
//! Sync protocol types for Driftwood.
//!
//! This crate provides:
//! - [`EntityKind`] and the namespace each kind replicates under
//! - [`RevisionId`] for revision-aware documents
//! - [`ConflictInfo`] and [`PruneTarget`] for conflict pruning
//! - The last-writer-wins resolution policy ([`resolve`])
//! - The [`ReplicationFilter`] deciding which documents may leave the device
//! - Outbox entry types ([`SyncQueueEntry`])
//! - The remote-store contract ([`RemoteStore`], [`RevisionSource`])
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod conflict;
mod document;
mod error;
mod filter;
mod kind;
mod queue;
mod remote;
mod revision;

pub use change::{FeedEvent, RemoteChange};
pub use conflict::{resolve, ConflictInfo, ConflictPolicy, PruneTarget, VersionStamp, Winner};
pub use document::RemoteDocument;
pub use error::{RemoteError, RemoteResult};
pub use filter::{DocClass, FilterConfig, FilterRequest, FilterSubject, ReplicationFilter};
pub use kind::EntityKind;
pub use queue::{Operation, QueueEntryId, SyncQueueEntry};
pub use remote::{
    ConflictCandidate, PushOutcome, RemoteStore, RevisionSource, ScanReport, Subscription,
    SubscriptionHandle,
};
pub use revision::RevisionId;

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
