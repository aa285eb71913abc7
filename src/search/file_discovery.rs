//! File discovery for walking the configured roots.
//!
//! Applies include/exclude globs (root-relative), binary extension detection and a
//! size limit. Excluded directories are pruned from the walk instead of being
//! descended into.

use crate::error::IndexError;
use crate::search::path_filter::PathFilter;
use crate::utils::{has_binary_extension, relative_slash_path};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Configuration for file discovery.
#[derive(Debug, Clone)]
pub struct FileDiscoveryConfig {
    /// Absolute root directories.
    pub roots: Vec<PathBuf>,

    /// Include/exclude globs, matched against root-relative paths.
    pub filter: PathFilter,

    /// Files larger than this are skipped. `None` = no limit.
    pub max_file_size: Option<u64>,
}

impl FileDiscoveryConfig {
    pub fn new(roots: Vec<PathBuf>, filter: PathFilter) -> Self {
        Self {
            roots,
            filter,
            max_file_size: Some(10 * 1024 * 1024),
        }
    }

    /// The root `path` lives under, if any. The longest matching root wins.
    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter(|r| path.starts_with(r))
            .max_by_key(|r| r.as_os_str().len())
            .map(PathBuf::as_path)
    }

    /// Whether a single path would be yielded by a walk, given its metadata.
    pub fn accepts(&self, path: &Path, metadata: &Metadata) -> bool {
        if !metadata.is_file() || has_binary_extension(path) {
            return false;
        }
        if let Some(max) = self.max_file_size {
            if metadata.len() > max {
                return false;
            }
        }
        match self.root_for(path) {
            Some(root) => self.filter.matches(&relative_slash_path(path, root)),
            None => false,
        }
    }
}

type PruneFn = Box<dyn FnMut(&walkdir::DirEntry) -> bool + Send>;

/// A file found by the walk.
#[derive(Debug)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub metadata: Metadata,
}

/// Iterator over discovered files.
///
/// Yields `Err(FileAccess)` for entries whose metadata could not be read and for
/// directories that could not be walked; walking continues after such errors.
pub struct FileDiscoveryIterator {
    /// One walker per root, consumed from the back.
    walkers: Vec<(PathBuf, walkdir::FilterEntry<walkdir::IntoIter, PruneFn>)>,
    filter: PathFilter,
    max_file_size: Option<u64>,
}

impl FileDiscoveryIterator {
    pub fn new(config: &FileDiscoveryConfig) -> Self {
        let walkers = config
            .roots
            .iter()
            .filter_map(|root| {
                if !root.exists() {
                    tracing::warn!(path = %root.display(), "Root does not exist, skipping");
                    return None;
                }
                let prune_root = root.clone();
                let prune_filter = config.filter.clone();
                let prune: PruneFn = Box::new(move |entry| {
                    if entry.depth() == 0 || !entry.file_type().is_dir() {
                        return true;
                    }
                    !prune_filter.excludes_dir(&relative_slash_path(entry.path(), &prune_root))
                });
                let walker = WalkDir::new(root)
                    .follow_links(true)
                    .into_iter()
                    .filter_entry(prune);
                Some((root.clone(), walker))
            })
            .collect();

        Self {
            walkers,
            filter: config.filter.clone(),
            max_file_size: config.max_file_size,
        }
    }
}

impl Iterator for FileDiscoveryIterator {
    type Item = Result<DiscoveredFile, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((root, walker)) = self.walkers.last_mut() {
            match walker.next() {
                Some(Ok(entry)) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let path = entry.path();

                    if !self.filter.matches(&relative_slash_path(path, root)) {
                        continue;
                    }

                    if has_binary_extension(path) {
                        continue;
                    }

                    let metadata = match entry.metadata() {
                        Ok(m) => m,
                        Err(e) => {
                            let io = e
                                .into_io_error()
                                .unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                            return Some(Err(IndexError::file_access(path.to_path_buf(), io)));
                        }
                    };

                    if let Some(max) = self.max_file_size {
                        if metadata.len() > max {
                            tracing::debug!(
                                path = %path.display(),
                                size = metadata.len(),
                                "Skipping file exceeding size limit"
                            );
                            continue;
                        }
                    }

                    return Some(Ok(DiscoveredFile {
                        path: path.to_path_buf(),
                        metadata,
                    }));
                }
                Some(Err(e)) => {
                    // an unreadable directory or a symlink loop; the caller decides
                    // what happens to files it previously saw under that path
                    let Some(path) = e.path().map(Path::to_path_buf) else {
                        tracing::warn!(error = %e, "Error walking directory");
                        continue;
                    };
                    let message = e.to_string();
                    let io = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other(message));
                    return Some(Err(IndexError::file_access(path, io)));
                }
                None => {
                    self.walkers.pop();
                }
            }
        }

        None
    }
}
