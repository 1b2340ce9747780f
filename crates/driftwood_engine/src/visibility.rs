//! Host visibility.
//!
//! Scheduled pruning only runs while the host reports itself in the
//! foreground.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reports whether the host application is visible.
pub trait HostVisibility: Send + Sync {
    /// Returns true while the host is in the foreground.
    fn is_visible(&self) -> bool;
}

/// A host that is always visible, e.g. a CLI or a server.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl HostVisibility for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

/// A visibility switch the host flips on foreground/background events.
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct VisibilityFlag(Arc<AtomicBool>);

impl VisibilityFlag {
    /// Creates a flag with the given initial value.
    pub fn new(visible: bool) -> Self {
        Self(Arc::new(AtomicBool::new(visible)))
    }

    /// Updates the flag.
    pub fn set_visible(&self, visible: bool) {
        self.0.store(visible, Ordering::SeqCst);
    }
}

impl Default for VisibilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HostVisibility for VisibilityFlag {
    fn is_visible(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
