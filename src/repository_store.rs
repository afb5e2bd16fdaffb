//! A thread-safe in-memory storage for the currently active ruleset.
//! [`RepositoryStore`] provides concurrent access for readers (toggle
//! evaluation) and writers (synchronizers).
use std::sync::{Arc, RwLock};

use crate::repository::{Repository, Segment, Toggle};

/// `RepositoryStore` provides a thread-safe (`Sync`) holder for the active
/// [`Repository`] snapshot.
///
/// A snapshot is always immutable and can only be replaced completely, so
/// a reader either sees the old, fully-formed snapshot or the new one —
/// never a mix. Readers take no lock beyond cloning the `Arc`.
#[derive(Default)]
pub struct RepositoryStore {
    repository: RwLock<Option<Arc<Repository>>>,
}

impl RepositoryStore {
    /// Create a new, uninitialized store.
    pub fn new() -> Self {
        RepositoryStore::default()
    }

    /// Point-in-time snapshot of the active ruleset. Returns `None` if no
    /// synchronization has completed yet. Evaluations should grab one
    /// snapshot and use it throughout for a consistent answer.
    pub fn snapshot(&self) -> Option<Arc<Repository>> {
        // The lock can only be poisoned if a writer panicked while
        // holding it, which should never happen.
        self.repository
            .read()
            .expect("thread holding repository lock should not panic")
            .clone()
    }

    /// Whether at least one snapshot has been published.
    pub fn initialized(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Replace the active snapshot. `None` (a failed fetch) is a no-op: a
    /// bad sync must never erase a good cache.
    pub fn refresh(&self, repository: Option<Repository>) {
        let Some(repository) = repository else {
            return;
        };

        let mut slot = self
            .repository
            .write()
            .expect("thread holding repository lock should not panic");
        *slot = Some(Arc::new(repository));
    }

    /// Drop the snapshot and mark the store uninitialized again.
    pub fn clear(&self) {
        let mut slot = self
            .repository
            .write()
            .expect("thread holding repository lock should not panic");
        *slot = None;
    }

    /// Look up a single toggle in the active snapshot.
    pub fn get_toggle(&self, key: &str) -> Option<Toggle> {
        self.snapshot()?.toggles.get(key).cloned()
    }

    /// Look up a single segment in the active snapshot.
    pub fn get_segment(&self, key: &str) -> Option<Segment> {
        self.snapshot()?.segments.get(key).cloned()
    }

    /// Deadline (epoch millis) until which debug events are reported.
    pub fn debug_until_time(&self) -> Option<u64> {
        self.snapshot()?.debug_until_time
    }
}
