//! In-memory journal backend.

use super::backend::JournalBackend;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A journal kept in memory.
///
/// Clones share the same bytes, so a test can drop a store and reopen it
/// from a clone to exercise recovery.
///
/// ```rust
/// use driftwood_store::{JournalBackend, MemoryJournal};
///
/// let mut journal = MemoryJournal::new();
/// journal.append(b"frame").unwrap();
/// assert_eq!(journal.clone().size().unwrap(), 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal holding `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the raw bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        self.data.write().extend_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        let mut data = self.data.write();
        let len = usize::try_from(len).map_err(|_| CoreError::codec("length overflow"))?;
        if len > data.len() {
            return Err(CoreError::journal_corruption(format!(
                "cannot truncate {} bytes to {len}",
                data.len()
            )));
        }
        data.truncate(len);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        *self.data.write() = data.to_vec();
        Ok(())
    }

    fn size(&self) -> CoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_bytes() {
        let mut journal = MemoryJournal::new();
        let other = journal.clone();
        journal.append(b"abc").unwrap();
        assert_eq!(other.data(), b"abc");
    }

    #[test]
    fn truncate_and_replace() {
        let mut journal = MemoryJournal::with_data(b"hello world".to_vec());
        journal.truncate(5).unwrap();
        assert_eq!(journal.data(), b"hello");
        assert!(journal.truncate(50).is_err());

        journal.replace(b"x").unwrap();
        assert_eq!(journal.size().unwrap(), 1);
    }
}
