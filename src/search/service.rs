//! The running indexing subsystem: startup, the exposed operations and shutdown.

use crate::config::{Config, WatchBackend};
use crate::error::IndexError;
use crate::index::SnapshotCell;
use crate::search::background_indexer::{index_loop, watch_loop, IndexPipeline};
use crate::search::engine::{SearchEngine, SearchResult};
use crate::search::file_discovery::FileDiscoveryConfig;
use crate::search::indexer::Indexer;
use crate::search::path_filter::PathFilter;
use crate::search::query::Query;
use crate::search::watcher::{ChangeSource, NotifyWatcher, PollingWatcher};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::info;

/// Quiet period the notify backend waits before delivering a burst of events.
const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(100);

/// Read-only introspection. Never waits for an in-flight pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    /// Unix epoch millis of the last publish
    pub last_indexed_at: Option<u64>,
    pub file_count: usize,
    pub pending_batch_size: usize,
    pub version: u64,
    pub indexing: bool,
    pub running: bool,
    pub backend: &'static str,
    pub roots: Vec<PathBuf>,
}

pub struct IndexService {
    roots: Vec<PathBuf>,
    interval: Duration,
    pipeline: Arc<IndexPipeline>,
    engine: SearchEngine,
    stop_tx: Option<mpsc::Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl IndexService {
    /// Validate the roots, build the first snapshot, and start the background
    /// threads if the indexer is enabled.
    pub fn start(config: Config) -> Result<Self, IndexError> {
        let Config { indexer, search } = config;
        let roots = resolve_roots(&indexer.root_paths())?;

        let filter = PathFilter::new(&indexer.include_globs, &indexer.exclude_globs).map_err(
            |e| IndexError::WatcherStartup {
                path: roots[0].clone(),
                reason: e.to_string(),
            },
        )?;
        let mut discovery = FileDiscoveryConfig::new(roots.clone(), filter);
        discovery.max_file_size = Some(indexer.max_file_size);

        let source: Box<dyn ChangeSource> = match indexer.backend {
            WatchBackend::Notify if indexer.enabled => {
                Box::new(NotifyWatcher::new(discovery.clone(), NOTIFY_DEBOUNCE)?)
            }
            _ => Box::new(PollingWatcher::new(discovery.clone())),
        };

        let cell = Arc::new(SnapshotCell::default());
        let pipeline = Arc::new(IndexPipeline::new(
            Arc::clone(&cell),
            Indexer::new(discovery, indexer.transcode_non_utf8),
            source,
        ));
        pipeline.rebuild_all();

        let mut service = Self {
            roots,
            interval: indexer.interval(),
            pipeline,
            engine: SearchEngine::new(cell, search.max_results),
            stop_tx: None,
            threads: Vec::new(),
        };
        if indexer.enabled {
            service.spawn_threads()?;
        } else {
            info!("Background indexer disabled; index changes only on refresh");
        }
        Ok(service)
    }

    fn spawn_threads(&mut self) -> Result<(), IndexError> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let spawn_error = |e: std::io::Error| IndexError::WatcherStartup {
            path: self.roots[0].clone(),
            reason: format!("cannot spawn thread: {}", e),
        };

        let watcher = {
            let pipeline = Arc::clone(&self.pipeline);
            let interval = self.interval;
            std::thread::Builder::new()
                .name("lcs-watcher".to_string())
                .spawn(move || watch_loop(pipeline, interval, stop_rx))
                .map_err(spawn_error)?
        };
        let indexer = {
            let pipeline = Arc::clone(&self.pipeline);
            std::thread::Builder::new()
                .name("lcs-indexer".to_string())
                .spawn(move || index_loop(pipeline))
                .map_err(spawn_error)?
        };

        self.stop_tx = Some(stop_tx);
        self.threads = vec![watcher, indexer];
        Ok(())
    }

    /// Rescan every root now and block until the resulting snapshot is published.
    /// Returns the version that is current afterwards.
    pub fn refresh(&self) -> u64 {
        self.pipeline.refresh()
    }

    pub fn search(&self, query: &Query) -> Result<Vec<SearchResult>, IndexError> {
        self.engine.search(query)
    }

    pub fn status(&self) -> IndexStatus {
        let snapshot = self.pipeline.snapshot();
        IndexStatus {
            last_indexed_at: self.pipeline.last_indexed_at(),
            file_count: snapshot.file_count(),
            pending_batch_size: self.pipeline.debouncer().pending_len(),
            version: snapshot.version(),
            indexing: self.pipeline.is_indexing(),
            running: !self.threads.is_empty(),
            backend: self.pipeline.source_name(),
            roots: self.roots.clone(),
        }
    }

    /// Stop the background threads and wait for them. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // the watcher also stops when the sender is dropped
            let _ = tx.send(());
        }
        self.pipeline.debouncer().close();
        let threads = std::mem::take(&mut self.threads);
        if threads.is_empty() {
            return;
        }
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("Background thread panicked");
            }
        }
        info!("Index service stopped");
    }
}

impl Drop for IndexService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Canonicalize and deduplicate roots. Any missing or non-directory root is fatal.
fn resolve_roots(paths: &[PathBuf]) -> Result<Vec<PathBuf>, IndexError> {
    let mut roots = Vec::with_capacity(paths.len());
    for path in paths {
        let canonical = path.canonicalize().map_err(|e| IndexError::WatcherStartup {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if !canonical.is_dir() {
            return Err(IndexError::WatcherStartup {
                path: path.clone(),
                reason: "not a directory".to_string(),
            });
        }
        if !roots.contains(&canonical) {
            roots.push(canonical);
        }
    }
    if roots.is_empty() {
        return Err(IndexError::WatcherStartup {
            path: PathBuf::new(),
            reason: "no roots configured".to_string(),
        });
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &std::path::Path, enabled: bool) -> Config {
        let mut config = Config::default();
        config.indexer.roots = vec![root.to_string_lossy().into_owned()];
        config.indexer.enabled = enabled;
        config
    }

    #[test]
    fn test_missing_root_is_startup_error() {
        let mut config = Config::default();
        config.indexer.roots = vec!["/definitely/not/here".to_string()];
        let err = IndexService::start(config).err().unwrap();
        assert!(matches!(err, IndexError::WatcherStartup { .. }));
    }

    #[test]
    fn test_file_root_is_startup_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let err = IndexService::start(config_for(&file, false)).err().unwrap();
        assert!(matches!(err, IndexError::WatcherStartup { .. }));
    }

    #[test]
    fn test_invalid_config_glob_is_startup_error() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(dir.path(), false);
        config.indexer.include_globs = vec!["src/[oops".to_string()];
        let err = IndexService::start(config).err().unwrap();
        assert!(matches!(err, IndexError::WatcherStartup { .. }));
    }

    #[test]
    fn test_disabled_service_indexes_on_start_and_refresh() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def alpha(): pass\n").unwrap();

        let service = IndexService::start(config_for(dir.path(), false)).unwrap();
        let status = service.status();
        assert!(!status.running);
        assert_eq!(status.file_count, 1);
        assert_eq!(status.version, 1);
        assert!(status.last_indexed_at.is_some());
        assert_eq!(status.backend, "poll");

        fs::write(dir.path().join("b.py"), "def beta(): pass\n").unwrap();
        assert!(service.search(&Query::new(["beta"])).unwrap().is_empty());
        let version = service.refresh();
        assert_eq!(version, 2);
        let results = service.search(&Query::new(["beta"])).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].relative_path, "b.py");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut service = IndexService::start(config_for(dir.path(), true)).unwrap();
        assert!(service.status().running);
        service.stop();
        assert!(!service.status().running);
        service.stop();
    }
}
