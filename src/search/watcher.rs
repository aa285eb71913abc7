//! Change detection for incremental indexing.
//!
//! [`ChangeSource`] is the capability the watcher loop depends on. Two backends:
//!
//! - [`PollingWatcher`]: walks the roots and diffs a fingerprint table against the
//!   previous scan. Portable; detection latency is one poll interval.
//! - [`NotifyWatcher`]: collects OS notifications through `notify-debouncer-full`
//!   and fingerprint-checks only the touched paths. Falls back to a full walk when
//!   a directory changes or the notification queue reports errors.

use crate::error::IndexError;
use crate::index::{ChangeBatch, Fingerprint, FingerprintTable};
use crate::search::file_discovery::{FileDiscoveryConfig, FileDiscoveryIterator};
use notify_debouncer_full::{
    new_debouncer, notify::RecursiveMode, DebouncedEvent, Debouncer, RecommendedCache,
};
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that can report which files changed since it last looked.
pub trait ChangeSource: Send {
    /// Paths added, modified or removed since the previous call.
    fn scan(&mut self) -> ChangeBatch;

    /// Every present file reported as added, plus removals of files that
    /// disappeared since the previous call. Used for forced refreshes.
    fn full_scan(&mut self) -> ChangeBatch;

    /// Drop recorded fingerprints so the next scan reports these paths again.
    fn forget(&mut self, paths: &[PathBuf]);

    fn name(&self) -> &'static str;
}

/// Poll + fingerprint change source.
pub struct PollingWatcher {
    discovery: FileDiscoveryConfig,
    table: FingerprintTable,
}

impl PollingWatcher {
    pub fn new(discovery: FileDiscoveryConfig) -> Self {
        Self {
            discovery,
            table: FingerprintTable::new(),
        }
    }

    pub fn table(&self) -> &FingerprintTable {
        &self.table
    }

    /// Walk all roots. Files and directories that could not be read are returned
    /// separately so what was known under them keeps its previous fingerprint.
    fn walk(&self) -> (FingerprintTable, Vec<PathBuf>) {
        let mut current = FingerprintTable::new();
        let mut unreadable = Vec::new();
        for item in FileDiscoveryIterator::new(&self.discovery) {
            match item {
                Ok(file) => {
                    current.insert(file.path, Fingerprint::from_metadata(&file.metadata));
                }
                Err(IndexError::FileAccess { path, source }) => {
                    if source.kind() == std::io::ErrorKind::NotFound {
                        // deleted mid-walk; the diff reports it as removed
                        continue;
                    }
                    warn!(path = %path.display(), error = %source, "Skipping unreadable path");
                    unreadable.push(path);
                }
                Err(e) => warn!(error = %e, "Scan error"),
            }
        }
        (current, unreadable)
    }

    /// Keep the last known fingerprint for every path at or below an unreadable
    /// entry, so those files are neither reported as removed nor lost.
    fn carry_unreadable(&self, current: &mut FingerprintTable, unreadable: Vec<PathBuf>) {
        if unreadable.is_empty() {
            return;
        }
        for (path, previous) in self.table.iter() {
            if current.contains(path) {
                continue;
            }
            if unreadable.iter().any(|u| path.starts_with(u)) {
                current.insert(path.clone(), *previous);
            }
        }
    }
}

impl ChangeSource for PollingWatcher {
    fn scan(&mut self) -> ChangeBatch {
        let (mut current, unreadable) = self.walk();
        self.carry_unreadable(&mut current, unreadable);
        let batch = self.table.diff(&current);
        self.table = current;
        if !batch.is_empty() {
            debug!(
                added = batch.added.len(),
                modified = batch.modified.len(),
                removed = batch.removed.len(),
                "Scan found changes"
            );
        }
        batch
    }

    fn full_scan(&mut self) -> ChangeBatch {
        let (mut current, unreadable) = self.walk();
        self.carry_unreadable(&mut current, unreadable);
        let mut batch = ChangeBatch::new();
        batch.added.extend(current.paths().cloned());
        batch.removed.extend(
            self.table
                .paths()
                .filter(|p| !current.contains(p))
                .cloned(),
        );
        self.table = current;
        batch
    }

    fn forget(&mut self, paths: &[PathBuf]) {
        for path in paths {
            self.table.remove(path);
        }
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

/// OS-notification change source.
pub struct NotifyWatcher {
    inner: PollingWatcher,
    rx: Receiver<PathBuf>,
    needs_walk: Arc<AtomicBool>,
    _debouncer: Debouncer<notify_debouncer_full::notify::RecommendedWatcher, RecommendedCache>,
}

impl NotifyWatcher {
    /// Start watching every root recursively.
    pub fn new(discovery: FileDiscoveryConfig, debounce: Duration) -> Result<Self, IndexError> {
        let (tx, rx) = mpsc::channel::<PathBuf>();
        let needs_walk = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&needs_walk);

        let mut debouncer = new_debouncer(
            debounce,
            None,
            move |result: Result<Vec<DebouncedEvent>, Vec<notify_debouncer_full::notify::Error>>| {
                match result {
                    Ok(events) => {
                        for event in events {
                            for path in touched_paths(&event) {
                                if tx.send(path).is_err() {
                                    debug!("Notify channel closed");
                                    return;
                                }
                            }
                        }
                    }
                    Err(errors) => {
                        for error in errors {
                            warn!("File watcher error: {:?}", error);
                        }
                        handler_flag.store(true, Ordering::Release);
                    }
                }
            },
        )
        .map_err(|e| startup_error(&discovery, e.to_string()))?;

        for root in &discovery.roots {
            debouncer
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| IndexError::WatcherStartup {
                    path: root.clone(),
                    reason: e.to_string(),
                })?;
            info!(path = %root.display(), "Watching directory for changes");
        }

        Ok(Self {
            inner: PollingWatcher::new(discovery),
            rx,
            needs_walk,
            _debouncer: debouncer,
        })
    }

    fn drain(&mut self) -> FxHashSet<PathBuf> {
        let mut touched = FxHashSet::default();
        loop {
            match self.rx.try_recv() {
                Ok(path) => {
                    touched.insert(path);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.needs_walk.store(true, Ordering::Release);
                    break;
                }
            }
        }
        touched
    }
}

fn startup_error(discovery: &FileDiscoveryConfig, reason: String) -> IndexError {
    IndexError::WatcherStartup {
        path: discovery.roots.first().cloned().unwrap_or_default(),
        reason,
    }
}

fn touched_paths(event: &DebouncedEvent) -> Vec<PathBuf> {
    use notify_debouncer_full::notify::EventKind;
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event.paths.clone(),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

impl ChangeSource for NotifyWatcher {
    fn scan(&mut self) -> ChangeBatch {
        let touched = self.drain();
        // children of a moved-in directory produce no events of their own
        let dir_changed = touched.iter().any(|p| p.is_dir());
        if self.needs_walk.swap(false, Ordering::AcqRel) || dir_changed {
            debug!(dir_changed, "Falling back to a full walk");
            return self.inner.scan();
        }

        let mut batch = ChangeBatch::new();
        for path in touched {
            match std::fs::metadata(&path) {
                Ok(metadata) => {
                    let known = self.inner.table.get(&path).copied();
                    if !self.inner.discovery.accepts(&path, &metadata) {
                        if known.is_some() {
                            self.inner.table.remove(&path);
                            batch.removed.insert(path);
                        }
                        continue;
                    }
                    let fingerprint = Fingerprint::from_metadata(&metadata);
                    match known {
                        None => {
                            batch.added.insert(path.clone());
                        }
                        Some(previous) if previous != fingerprint => {
                            batch.modified.insert(path.clone());
                        }
                        Some(_) => {}
                    }
                    self.inner.table.insert(path, fingerprint);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if self.inner.table.remove(&path).is_some() {
                        batch.removed.insert(path.clone());
                    }
                    batch.removed.extend(self.inner.table.remove_under(&path));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                }
            }
        }
        batch
    }

    fn full_scan(&mut self) -> ChangeBatch {
        self.drain();
        self.needs_walk.store(false, Ordering::Release);
        self.inner.full_scan()
    }

    fn forget(&mut self, paths: &[PathBuf]) {
        self.inner.forget(paths);
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}
