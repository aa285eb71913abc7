//! Immutable index snapshots and the cell they are published through.
//!
//! A snapshot owns a [`FileTable`]: a fixed array of copy-on-write shards, each
//! mapping absolute paths to reference-counted [`IndexedFile`]s. A new snapshot
//! starts as a cheap copy of the previous table (one `Arc` per shard) and only the
//! shards that receive an insert or removal are cloned, so unchanged files are
//! shared between snapshots.
//!
//! ```text
//! SnapshotCell ──ArcSwap──▶ Arc<IndexSnapshot v7> ──▶ shards[0..64] ──▶ Arc<IndexedFile>
//!                             ▲ readers hold                │ shared with v6
//! ```

use crate::error::IndexError;
use crate::index::fingerprint::Fingerprint;
use crate::index::tokenizer::{index_lines, FilePostings};
use crate::utils::now_millis;
use arc_swap::ArcSwap;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Number of copy-on-write shards in a [`FileTable`].
pub const SHARD_COUNT: usize = 64;

/// Per-file metadata kept in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Path relative to its root, forward slashes
    pub relative_path: String,
    pub fingerprint: Fingerprint,
    /// Number of distinct tokens in the file
    pub token_count: usize,
}

/// One indexed file: record, line text and token postings.
#[derive(Debug)]
pub struct IndexedFile {
    record: FileRecord,
    lines: Vec<String>,
    postings: FilePostings,
}

impl IndexedFile {
    /// Tokenize `text` and build the entry for `path`.
    pub fn from_text(
        path: PathBuf,
        relative_path: String,
        fingerprint: Fingerprint,
        text: &str,
    ) -> Self {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let postings = index_lines(&lines);
        Self {
            record: FileRecord {
                path,
                relative_path,
                fingerprint,
                token_count: postings.len(),
            },
            lines,
            postings,
        }
    }

    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.record.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Text of a 1-based line.
    pub fn line(&self, line_number: usize) -> Option<&str> {
        line_number
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(String::as_str)
    }

    /// Lines containing `token` (lowercase), ascending.
    pub fn lines_with_token(&self, token: &str) -> &[usize] {
        self.postings.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    fn check_consistency(&self) -> Result<(), String> {
        if self.record.token_count != self.postings.len() {
            return Err(format!(
                "{}: record has {} tokens, postings have {}",
                self.record.path.display(),
                self.record.token_count,
                self.postings.len()
            ));
        }
        let line_count = self.lines.len();
        for (token, lines) in &self.postings {
            if lines.is_empty() || lines.iter().any(|&n| n == 0 || n > line_count) {
                return Err(format!(
                    "{}: posting for '{}' points outside {} lines",
                    self.record.path.display(),
                    token,
                    line_count
                ));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(mut self) -> Self {
        self.record.token_count += 1;
        self
    }
}

type Shard = FxHashMap<PathBuf, Arc<IndexedFile>>;

fn shard_of(path: &Path) -> usize {
    let mut hasher = FxHasher::default();
    path.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Sharded, structurally shared path -> file map.
#[derive(Debug, Clone)]
pub struct FileTable {
    shards: Vec<Arc<Shard>>,
    len: usize,
    total_bytes: u64,
}

impl Default for FileTable {
    fn default() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Arc::new(Shard::default())).collect(),
            len: 0,
            total_bytes: 0,
        }
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<IndexedFile>> {
        self.shards[shard_of(path)].get(path)
    }

    /// Insert or replace the entry for the file's path. Clones the target shard
    /// only if it is still shared with another table.
    pub fn insert(&mut self, file: Arc<IndexedFile>) -> Option<Arc<IndexedFile>> {
        let path = file.record.path.clone();
        let size = file.record.fingerprint.size;
        let shard = Arc::make_mut(&mut self.shards[shard_of(&path)]);
        let previous = shard.insert(path, file);
        match &previous {
            Some(old) => {
                self.total_bytes = self.total_bytes - old.record.fingerprint.size + size;
            }
            None => {
                self.len += 1;
                self.total_bytes += size;
            }
        }
        previous
    }

    pub fn remove(&mut self, path: &Path) -> Option<Arc<IndexedFile>> {
        let idx = shard_of(path);
        if !self.shards[idx].contains_key(path) {
            return None;
        }
        let removed = Arc::make_mut(&mut self.shards[idx]).remove(path);
        if let Some(old) = &removed {
            self.len -= 1;
            self.total_bytes -= old.record.fingerprint.size;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<IndexedFile>> {
        self.shards.iter().flat_map(|s| s.values())
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.shards.iter().flat_map(|s| s.keys())
    }

    /// Number of shards physically shared with `other`.
    pub fn shared_shards(&self, other: &FileTable) -> usize {
        self.shards
            .iter()
            .zip(&other.shards)
            .filter(|(a, b)| Arc::ptr_eq(a, b))
            .count()
    }

    fn counted_len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }
}

/// Lifecycle of a snapshot. Transitions only move forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SnapshotState {
    Building = 0,
    Published = 1,
    Superseded = 2,
    Reclaimed = 3,
}

impl SnapshotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SnapshotState::Building,
            1 => SnapshotState::Published,
            2 => SnapshotState::Superseded,
            _ => SnapshotState::Reclaimed,
        }
    }
}

/// An immutable, complete view of the index at one point in time.
#[derive(Debug)]
pub struct IndexSnapshot {
    files: FileTable,
    version: u64,
    /// Unix epoch millis
    created_at: u64,
    state: AtomicU8,
}

impl IndexSnapshot {
    /// The version-0 snapshot with no files.
    pub fn empty() -> Self {
        Self {
            files: FileTable::new(),
            version: 0,
            created_at: now_millis(),
            state: AtomicU8::new(SnapshotState::Building as u8),
        }
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<IndexedFile>> {
        self.files.get(path)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn state(&self) -> SnapshotState {
        SnapshotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// All (path, line) occurrences of a lowercase token.
    pub fn postings(&self, token: &str) -> Vec<(&Path, usize)> {
        let mut out: Vec<(&Path, usize)> = self
            .files
            .iter()
            .flat_map(|f| f.lines_with_token(token).iter().map(|&n| (f.path(), n)))
            .collect();
        out.sort();
        out
    }

    /// Check record/postings agreement for the given paths and the table counters.
    pub fn verify(&self, paths: &[PathBuf]) -> Result<(), IndexError> {
        if self.files.counted_len() != self.files.len() {
            return Err(IndexError::IndexInconsistency(format!(
                "file table reports {} files but holds {}",
                self.files.len(),
                self.files.counted_len()
            )));
        }
        for path in paths {
            if let Some(file) = self.files.get(path) {
                if file.path() != path {
                    return Err(IndexError::IndexInconsistency(format!(
                        "entry for {} records path {}",
                        path.display(),
                        file.path().display()
                    )));
                }
                file.check_consistency()
                    .map_err(IndexError::IndexInconsistency)?;
            }
        }
        Ok(())
    }

    /// Atomically move from `from` to `to`; false if the snapshot was elsewhere.
    fn advance(&self, from: SnapshotState, to: SnapshotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for IndexSnapshot {
    fn drop(&mut self) {
        let state = self.state();
        *self.state.get_mut() = SnapshotState::Reclaimed as u8;
        tracing::trace!(version = self.version, from = ?state, "Snapshot reclaimed");
    }
}

/// Builds the next snapshot from the previous one.
pub struct SnapshotBuilder {
    files: FileTable,
    version: u64,
}

impl SnapshotBuilder {
    /// Start from `previous`, sharing all of its shards.
    pub fn from_previous(previous: &IndexSnapshot) -> Self {
        Self {
            files: previous.files.clone(),
            version: previous.version + 1,
        }
    }

    /// Start from nothing, discarding any incremental state.
    pub fn fresh(after_version: u64) -> Self {
        Self {
            files: FileTable::new(),
            version: after_version + 1,
        }
    }

    pub fn get(&self, path: &Path) -> Option<&Arc<IndexedFile>> {
        self.files.get(path)
    }

    pub fn insert(&mut self, file: Arc<IndexedFile>) {
        self.files.insert(file);
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.files.remove(path).is_some()
    }

    pub fn build(self) -> IndexSnapshot {
        IndexSnapshot {
            files: self.files,
            version: self.version,
            created_at: now_millis(),
            state: AtomicU8::new(SnapshotState::Building as u8),
        }
    }
}

/// The single "current snapshot" reference.
///
/// Written only by the indexer through [`SnapshotCell::publish`] (one atomic swap);
/// read lock-free by any number of searchers through [`SnapshotCell::load`].
#[derive(Debug)]
pub struct SnapshotCell {
    current: ArcSwap<IndexSnapshot>,
}

impl SnapshotCell {
    pub fn new(initial: IndexSnapshot) -> Self {
        initial.advance(SnapshotState::Building, SnapshotState::Published);
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The currently published snapshot. The returned `Arc` stays valid after a
    /// newer snapshot is published.
    pub fn load(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    /// Replace the current snapshot. Returns the newly published one.
    pub fn publish(&self, next: IndexSnapshot) -> Arc<IndexSnapshot> {
        if !next.advance(SnapshotState::Building, SnapshotState::Published) {
            tracing::error!(
                version = next.version,
                state = ?next.state(),
                "Publishing a snapshot that was not building"
            );
        }
        let next = Arc::new(next);
        let previous = self.current.swap(Arc::clone(&next));
        debug_assert!(previous.version < next.version);
        previous.advance(SnapshotState::Published, SnapshotState::Superseded);
        tracing::debug!(
            version = next.version,
            superseded = previous.version,
            files = next.file_count(),
            "Snapshot published"
        );
        next
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new(IndexSnapshot::empty())
    }
}
