//! Store configuration.

use driftwood_protocol::FilterConfig;

/// Configuration for opening an [`crate::EntityStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the journal after every write (safer but slower).
    pub sync_on_write: bool,
    /// Compact the journal on open once it holds more than this many frames
    /// (0 = never).
    pub compact_after_frames: usize,
    /// Namespaces and markers shared with the replication filter. Internal
    /// ids are refused and id namespaces must match the entity kind.
    pub filter: FilterConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_after_frames: 0,
            filter: FilterConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the journal after every write.
    #[must_use]
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the frame count that triggers compaction on open.
    #[must_use]
    pub fn compact_after_frames(mut self, frames: usize) -> Self {
        self.compact_after_frames = frames;
        self
    }

    /// Sets the filter configuration.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }
}
