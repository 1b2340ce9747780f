//! # Driftwood Remote
//!
//! An in-memory remote document store implementing the Driftwood remote
//! contract.
//!
//! This crate provides:
//! - [`MemoryRemote`]: revision-aware writes, deterministic winner selection,
//!   revision removal and live per-document subscriptions
//! - Knobs for tests: availability, injected subscribe and removal failures,
//!   concurrent branches from other devices, stream errors
//!
//! ## Revision model
//!
//! Every document is a set of leaf revisions. A write on top of the current
//! winner replaces it; a write on top of anything else is refused with
//! [`driftwood_protocol::PushOutcome::Conflict`]. Branches from other devices
//! are added with [`MemoryRemote::put_revision`]. The winner is the greatest
//! non-deleted leaf by generation, then digest.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;
mod tree;

pub use memory::MemoryRemote;
pub use tree::RevisionTree;
