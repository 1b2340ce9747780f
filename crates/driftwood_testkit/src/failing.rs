//! A journal that fails on demand.
//!
//! Used to check that a store write whose append fails leaves no trace, and
//! that callers react to the failure the way they should.

use driftwood_store::{CoreError, CoreResult, JournalBackend, MemoryJournal};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Plan {
    /// Appends still allowed before failures start.
    skip: AtomicUsize,
    /// Appends that fail once `skip` is used up.
    fail: AtomicUsize,
    /// Whether a failing append writes half of its bytes first.
    tear: AtomicBool,
}

/// An in-memory journal whose appends can be made to fail.
///
/// Clones share both the bytes and the failure plan, so a test keeps one
/// clone to steer the journal while the store owns the other.
#[derive(Debug, Clone, Default)]
pub struct FailingJournal {
    inner: MemoryJournal,
    plan: Arc<Plan>,
}

impl FailingJournal {
    /// Creates an empty journal that does not fail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `skip` appends through, then fails the next `count`.
    pub fn fail_appends(&self, skip: usize, count: usize) {
        self.plan.skip.store(skip, Ordering::SeqCst);
        self.plan.fail.store(count, Ordering::SeqCst);
    }

    /// Makes failing appends leave half a frame behind, like a crash in the
    /// middle of a write.
    pub fn tear_failed_appends(&self, tear: bool) {
        self.plan.tear.store(tear, Ordering::SeqCst);
    }

    /// Returns the underlying bytes, e.g. to reopen a store from them.
    pub fn journal(&self) -> MemoryJournal {
        self.inner.clone()
    }

    fn should_fail(&self) -> bool {
        let skipped = self
            .plan
            .skip
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if skipped {
            return false;
        }
        self.plan
            .fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl JournalBackend for FailingJournal {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        if self.should_fail() {
            if self.plan.tear.load(Ordering::SeqCst) {
                self.inner.append(&data[..data.len() / 2])?;
            }
            return Err(CoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated append failure",
            )));
        }
        self.inner.append(data)
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        self.inner.truncate(len)
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        self.inner.replace(data)
    }

    fn size(&self) -> CoreResult<u64> {
        self.inner.size()
    }
}
