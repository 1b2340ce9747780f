//! Journal backend trait.

use crate::error::CoreResult;

/// Byte store underneath the journal.
///
/// Backends are opaque: they never interpret frames. The store owns the
/// format and only appends, reads everything back on open, or swaps the
/// whole content during compaction.
pub trait JournalBackend: Send + Sync {
    /// Reads the complete content.
    fn read_all(&self) -> CoreResult<Vec<u8>>;

    /// Appends `data` at the end.
    fn append(&mut self, data: &[u8]) -> CoreResult<()>;

    /// Makes every appended byte durable.
    fn sync(&mut self) -> CoreResult<()>;

    /// Cuts the content back to `len` bytes.
    fn truncate(&mut self, len: u64) -> CoreResult<()>;

    /// Atomically replaces the whole content with `data`.
    fn replace(&mut self, data: &[u8]) -> CoreResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> CoreResult<u64>;
}

impl<B: JournalBackend + ?Sized> JournalBackend for Box<B> {
    fn read_all(&self) -> CoreResult<Vec<u8>> {
        (**self).read_all()
    }

    fn append(&mut self, data: &[u8]) -> CoreResult<()> {
        (**self).append(data)
    }

    fn sync(&mut self) -> CoreResult<()> {
        (**self).sync()
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        (**self).truncate(len)
    }

    fn replace(&mut self, data: &[u8]) -> CoreResult<()> {
        (**self).replace(data)
    }

    fn size(&self) -> CoreResult<u64> {
        (**self).size()
    }
}
