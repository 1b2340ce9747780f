//! # Driftwood Engine
//!
//! Sync machinery for Driftwood.
//!
//! This crate provides:
//! - The sync outbox ([`SyncOutbox`]) and a drainer pushing it to a remote
//!   store ([`OutboxDrainer`])
//! - The conflict pruning scheduler ([`PruneScheduler`])
//! - The change-feed subscriber with bounded reconnection
//!   ([`ChangeFeedSubscriber`])
//! - A service object owning all of the above ([`SyncService`])
//!
//! ## Architecture
//!
//! The local store is the only mutable shared resource. Local writes always
//! succeed against it; the outbox records them for delivery. The drainer
//! and the change feed exchange revisions with the remote store and record
//! diverging ones as losing revisions, which the pruning scheduler deletes
//! later. Remote failures never escape a batch: they are counted in
//! [`DrainReport`], [`PruneResult`] and [`FeedStatus`].
//!
//! ## Key Invariants
//!
//! - Internal (`_local/`, `_design/`) documents are never queued, pushed or
//!   pruned
//! - At most one pruning run is in flight
//! - A winning revision is never addressed by a delete
//! - At most one live subscription per watched document

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod drain;
mod error;
mod feed;
mod outbox;
mod prune;
mod service;
mod visibility;

pub use config::{FeedConfig, PruneConfig, SyncConfig};
pub use drain::{DrainReport, OutboxDrainer};
pub use error::{SyncError, SyncResult};
pub use feed::{ChangeFeedSubscriber, ChangeSink, FeedState, FeedStatus};
pub use outbox::SyncOutbox;
pub use prune::{PruneError, PruneResult, PruneScheduler, PruneState, SkipReason};
pub use service::SyncService;
pub use visibility::{AlwaysVisible, HostVisibility, VisibilityFlag};
