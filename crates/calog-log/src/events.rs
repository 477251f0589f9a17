//! Change notifications.

use calog_core::Entry;
use std::sync::Arc;

/// Structural change delivered to subscribers after a successful commit.
#[derive(Clone, Debug, Default)]
pub struct Change {
    /// Entries that became part of the log.
    pub added: Vec<Arc<Entry>>,
    /// Entries dropped by trimming or hidden by cut entries.
    pub removed: Vec<Arc<Entry>>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
