//! Coalesces change batches into at most one pending batch.
//!
//! The watcher submits a batch after every scan that found something. While an
//! indexer pass runs, further submissions merge into the same pending batch, so any
//! number of scans during a pass produce exactly one follow-up pass.

use crate::index::ChangeBatch;
use crate::utils::lock_or_recover;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Fold `incoming` (newer) into `existing` (older, not yet indexed).
///
/// - removals win over older additions/modifications of the same path;
/// - a path added and then removed inside one pending batch disappears entirely;
/// - a path removed and then re-created becomes a modification, since the
///   published snapshot may still hold its old postings.
pub fn merge(existing: &mut ChangeBatch, incoming: ChangeBatch) {
    let ChangeBatch {
        added,
        modified,
        removed,
    } = incoming;

    for path in removed {
        existing.modified.remove(&path);
        if !existing.added.remove(&path) {
            existing.removed.insert(path);
        }
    }

    for path in added {
        if existing.removed.remove(&path) {
            existing.modified.insert(path);
        } else if !existing.modified.contains(&path) {
            existing.added.insert(path);
        }
    }

    for path in modified {
        if existing.added.contains(&path) {
            continue;
        }
        existing.removed.remove(&path);
        existing.modified.insert(path);
    }
}

#[derive(Debug, Default)]
struct PendingState {
    batch: Option<ChangeBatch>,
    /// Paths whose indexing failed, to be re-reported by the next scan
    retries: Vec<PathBuf>,
    closed: bool,
}

/// Holder of the single pending batch.
#[derive(Debug, Default)]
pub struct Debouncer {
    state: Mutex<PendingState>,
    ready: Condvar,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch into the pending one. Empty batches are ignored.
    /// Returns true if a pending batch already existed.
    pub fn submit(&self, batch: ChangeBatch) -> bool {
        if batch.is_empty() {
            return false;
        }
        let mut state = lock_or_recover(&self.state);
        let coalesced = match state.batch.as_mut() {
            Some(existing) => {
                merge(existing, batch);
                true
            }
            None => {
                state.batch = Some(batch);
                false
            }
        };
        // a merge may cancel everything out
        if state.batch.as_ref().is_some_and(ChangeBatch::is_empty) {
            state.batch = None;
        }
        drop(state);
        self.ready.notify_all();
        coalesced
    }

    /// Take the pending batch, leaving none.
    pub fn take(&self) -> Option<ChangeBatch> {
        lock_or_recover(&self.state).batch.take()
    }

    /// Wait up to `timeout` for a pending batch without taking it.
    /// Returns false on timeout or once the debouncer is closed.
    pub fn wait_pending(&self, timeout: Duration) -> bool {
        let state = lock_or_recover(&self.state);
        let (state, _) = match self
            .ready
            .wait_timeout_while(state, timeout, |s| s.batch.is_none() && !s.closed)
        {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        !state.closed && state.batch.is_some()
    }

    pub fn is_closed(&self) -> bool {
        lock_or_recover(&self.state).closed
    }

    /// Number of paths waiting in the pending batch.
    pub fn pending_len(&self) -> usize {
        lock_or_recover(&self.state)
            .batch
            .as_ref()
            .map_or(0, ChangeBatch::len)
    }

    /// True if the pending batch will remove `path`.
    pub fn is_pending_removal(&self, path: &Path) -> bool {
        lock_or_recover(&self.state)
            .batch
            .as_ref()
            .is_some_and(|b| b.removed.contains(path))
    }

    /// Queue paths that failed to index; the watcher re-reports them.
    pub fn defer_retry(&self, paths: impl IntoIterator<Item = PathBuf>) {
        lock_or_recover(&self.state).retries.extend(paths);
    }

    pub fn take_retries(&self) -> Vec<PathBuf> {
        std::mem::take(&mut lock_or_recover(&self.state).retries)
    }

    /// Wake all waiters and make further waits return immediately.
    pub fn close(&self) {
        lock_or_recover(&self.state).closed = true;
        self.ready.notify_all();
    }
}
