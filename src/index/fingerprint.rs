//! Cheap per-file fingerprints and the change batches derived from them.

use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Size + modification time. Equal fingerprints mean "unchanged" without
/// reading content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime_ns: u128,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            size: metadata.len(),
            mtime_ns,
        }
    }

    pub fn of(path: &Path) -> std::io::Result<Self> {
        std::fs::metadata(path).map(|m| Self::from_metadata(&m))
    }
}

/// Paths added, modified and removed between two scans.
///
/// The three sets are disjoint. Iteration order is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub added: FxHashSet<PathBuf>,
    pub modified: FxHashSet<PathBuf>,
    pub removed: FxHashSet<PathBuf>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of paths in the batch.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Added and modified paths, i.e. everything that must be (re)read.
    pub fn paths_to_index(&self) -> impl Iterator<Item = &PathBuf> {
        self.added.iter().chain(self.modified.iter())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.added.contains(path) || self.modified.contains(path) || self.removed.contains(path)
    }
}

/// Fingerprints recorded by one scan, keyed by absolute path.
#[derive(Debug, Clone, Default)]
pub struct FingerprintTable {
    entries: FxHashMap<PathBuf, Fingerprint>,
}

impl FingerprintTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf, fingerprint: Fingerprint) {
        self.entries.insert(path, fingerprint);
    }

    pub fn get(&self, path: &Path) -> Option<&Fingerprint> {
        self.entries.get(path)
    }

    pub fn remove(&mut self, path: &Path) -> Option<Fingerprint> {
        self.entries.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Fingerprint)> {
        self.entries.iter()
    }

    /// Drop every entry at or below `dir`.
    pub fn remove_under(&mut self, dir: &Path) -> Vec<PathBuf> {
        let gone: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        for path in &gone {
            self.entries.remove(path);
        }
        gone
    }

    /// Changes needed to go from `self` (previous scan) to `current`.
    pub fn diff(&self, current: &FingerprintTable) -> ChangeBatch {
        let mut batch = ChangeBatch::new();
        for (path, fingerprint) in &current.entries {
            match self.entries.get(path) {
                None => {
                    batch.added.insert(path.clone());
                }
                Some(previous) if previous != fingerprint => {
                    batch.modified.insert(path.clone());
                }
                Some(_) => {}
            }
        }
        for path in self.entries.keys() {
            if !current.entries.contains_key(path) {
                batch.removed.insert(path.clone());
            }
        }
        batch
    }
}
