//! # Driftwood Testkit
//!
//! Test utilities for Driftwood.
//!
//! This crate provides:
//! - Store fixtures backed by memory or a temporary directory
//! - Entity builders for the common kinds
//! - A journal that fails on demand, for atomicity tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use driftwood_testkit::prelude::*;
//! use driftwood_protocol::EntityKind;
//!
//! let store = TestStore::memory();
//! store.upsert(EntityKind::Task, task("tasks:1", 100)).unwrap();
//! assert_eq!(store.count(EntityKind::Task), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod failing;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::failing::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use failing::*;
pub use fixtures::*;
pub use generators::*;
