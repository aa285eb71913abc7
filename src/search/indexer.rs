//! Builds new snapshots from change batches.
//!
//! An incremental pass starts from the previous snapshot's file table, removes the
//! removed paths, and re-reads only added/modified paths whose fingerprint differs
//! from the recorded one. Everything else is carried over by reference. A full
//! rebuild starts from an empty table and reads all files in parallel.

use crate::error::IndexError;
use crate::index::{ChangeBatch, Fingerprint, IndexSnapshot, IndexedFile, SnapshotBuilder};
use crate::search::file_discovery::FileDiscoveryConfig;
use crate::utils::{decode_text, relative_slash_path};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one indexer pass.
#[derive(Debug)]
pub struct PassOutcome {
    pub snapshot: IndexSnapshot,
    /// Files read and tokenized
    pub indexed: usize,
    /// Added/modified paths whose fingerprint matched the previous snapshot
    pub reused: usize,
    pub removed: usize,
    /// Paths skipped because a newer pending batch removes them
    pub skipped: usize,
    /// Paths that could not be read; their old entries (if any) are kept
    pub failed: Vec<PathBuf>,
}

enum Loaded {
    Unchanged,
    Fresh(IndexedFile),
    Vanished,
}

/// Reads and tokenizes files. Stateless apart from its configuration; exclusivity
/// of passes is enforced by the caller.
#[derive(Debug, Clone)]
pub struct Indexer {
    discovery: FileDiscoveryConfig,
    transcode_non_utf8: bool,
}

impl Indexer {
    pub fn new(discovery: FileDiscoveryConfig, transcode_non_utf8: bool) -> Self {
        Self {
            discovery,
            transcode_non_utf8,
        }
    }

    /// Apply `batch` on top of `previous`.
    ///
    /// `superseded` is consulted before each file is read; returning true skips the
    /// path for this pass (a newer pending batch already removes it).
    pub fn apply(
        &self,
        previous: &IndexSnapshot,
        batch: &ChangeBatch,
        superseded: &dyn Fn(&Path) -> bool,
    ) -> Result<PassOutcome, IndexError> {
        let mut builder = SnapshotBuilder::from_previous(previous);
        let mut touched: Vec<PathBuf> = Vec::with_capacity(batch.len());
        let mut indexed = 0usize;
        let mut reused = 0usize;
        let mut removed = 0usize;
        let mut skipped = 0usize;
        let mut failed = Vec::new();

        for path in &batch.removed {
            if builder.remove(path) {
                removed += 1;
            }
            touched.push(path.clone());
        }

        for path in batch.paths_to_index() {
            if superseded(path) {
                debug!(path = %path.display(), "Skipping path removed by a newer batch");
                skipped += 1;
                continue;
            }
            touched.push(path.clone());

            match self.load(path, previous.get(path).map(|f| f.record().fingerprint)) {
                Ok(Loaded::Unchanged) => reused += 1,
                Ok(Loaded::Fresh(file)) => {
                    builder.insert(Arc::new(file));
                    indexed += 1;
                }
                Ok(Loaded::Vanished) => {
                    if builder.remove(path) {
                        removed += 1;
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Keeping previous postings for unreadable file");
                    failed.push(path.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let snapshot = builder.build();
        snapshot.verify(&touched)?;

        Ok(PassOutcome {
            snapshot,
            indexed,
            reused,
            removed,
            skipped,
            failed,
        })
    }

    /// Build a snapshot containing exactly `paths`, ignoring any previous state.
    pub fn rebuild(&self, after_version: u64, paths: &[PathBuf]) -> PassOutcome {
        let results: Vec<(PathBuf, Result<Loaded, IndexError>)> = paths
            .par_iter()
            .map(|path| (path.clone(), self.load(path, None)))
            .collect();

        let mut builder = SnapshotBuilder::fresh(after_version);
        let mut indexed = 0usize;
        let mut failed = Vec::new();
        for (path, result) in results {
            match result {
                Ok(Loaded::Fresh(file)) => {
                    builder.insert(Arc::new(file));
                    indexed += 1;
                }
                Ok(Loaded::Unchanged) | Ok(Loaded::Vanished) => {}
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable file during rebuild");
                    failed.push(path);
                }
            }
        }

        PassOutcome {
            snapshot: builder.build(),
            indexed,
            reused: 0,
            removed: 0,
            skipped: 0,
            failed,
        }
    }

    /// Read one file unless its fingerprint equals `known`.
    fn load(&self, path: &Path, known: Option<Fingerprint>) -> Result<Loaded, IndexError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Vanished),
            Err(e) => return Err(IndexError::file_access(path, e)),
        };
        let fingerprint = Fingerprint::from_metadata(&metadata);
        if known == Some(fingerprint) {
            return Ok(Loaded::Unchanged);
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Vanished),
            Err(e) => return Err(IndexError::file_access(path, e)),
        };
        let text = decode_text(&bytes, self.transcode_non_utf8);
        let relative = match self.discovery.root_for(path) {
            Some(root) => relative_slash_path(path, root),
            None => path.to_string_lossy().into_owned(),
        };

        debug!(path = %path.display(), bytes = bytes.len(), "Indexed file");
        Ok(Loaded::Fresh(IndexedFile::from_text(
            path.to_path_buf(),
            relative,
            fingerprint,
            &text,
        )))
    }
}
