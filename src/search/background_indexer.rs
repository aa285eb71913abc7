//! Background indexing: the watcher loop, the indexer loop and the pass logic they share.
//!
//! ```text
//! watcher thread:  every interval ─ scan ─▶ Debouncer (one pending batch)
//! indexer thread:  wait for pending ─ lock pass ─ take ─ apply ─ publish
//! refresh():       full scan ─▶ Debouncer ─ lock pass ─ take ─ apply ─ publish
//! ```
//!
//! Only one pass runs at a time (`pass_lock`). A batch is always taken from the
//! debouncer while holding the pass lock, so a caller that acquires the lock after
//! submitting knows its changes are either in the batch it takes or already published.

use crate::error::IndexError;
use crate::index::{ChangeBatch, IndexSnapshot, SnapshotCell};
use crate::search::debouncer::Debouncer;
use crate::search::indexer::{Indexer, PassOutcome};
use crate::search::watcher::ChangeSource;
use crate::utils::{format_bytes, lock_or_recover, now_millis};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long the indexer thread waits for a batch before re-checking for shutdown.
const INDEX_WAIT: Duration = Duration::from_millis(250);

/// State shared by the watcher thread, the indexer thread and service callers.
pub struct IndexPipeline {
    cell: Arc<SnapshotCell>,
    debouncer: Debouncer,
    indexer: Indexer,
    source: Mutex<Box<dyn ChangeSource>>,
    source_name: &'static str,
    pass_lock: Mutex<()>,
    indexing: AtomicBool,
    /// Unix epoch millis of the last publish, 0 before the first
    last_indexed_at: AtomicU64,
}

impl IndexPipeline {
    pub fn new(cell: Arc<SnapshotCell>, indexer: Indexer, source: Box<dyn ChangeSource>) -> Self {
        Self {
            cell,
            debouncer: Debouncer::new(),
            indexer,
            source_name: source.name(),
            source: Mutex::new(source),
            pass_lock: Mutex::new(()),
            indexing: AtomicBool::new(false),
            last_indexed_at: AtomicU64::new(0),
        }
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::Acquire)
    }

    pub fn last_indexed_at(&self) -> Option<u64> {
        match self.last_indexed_at.load(Ordering::Acquire) {
            0 => None,
            millis => Some(millis),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source_name
    }

    /// Build and publish a snapshot from a full scan, discarding incremental state.
    pub fn rebuild_all(&self) {
        let _pass = lock_or_recover(&self.pass_lock);
        self.indexing.store(true, Ordering::Release);
        let after = self.cell.load().version();
        self.rebuild_locked(after);
        self.indexing.store(false, Ordering::Release);
    }

    /// One watcher cycle: re-arm failed paths, scan, submit.
    /// Returns the number of changed paths found.
    pub fn scan_once(&self) -> usize {
        let retries = self.debouncer.take_retries();
        let batch = {
            let mut source = lock_or_recover(&self.source);
            if !retries.is_empty() {
                debug!(count = retries.len(), "Re-arming paths that failed to index");
                source.forget(&retries);
            }
            source.scan()
        };
        let batch = self.reclassify_known(batch);
        let found = batch.len();
        if found > 0 && self.debouncer.submit(batch) {
            debug!(
                pending = self.debouncer.pending_len(),
                "Coalesced changes into pending batch"
            );
        }
        found
    }

    /// Force a full rescan of all roots and return once the result is published.
    pub fn refresh(&self) -> u64 {
        // no pass is in flight while the scan is diffed against the snapshot
        let _pass = lock_or_recover(&self.pass_lock);
        self.queue_full_scan();
        if let Some(batch) = self.debouncer.take() {
            self.process_locked(batch);
        }
        self.cell.load().version()
    }

    /// Full scan of every root, submitted as one batch. Caller holds the pass lock.
    fn queue_full_scan(&self) {
        let snapshot = self.cell.load();
        let mut batch = lock_or_recover(&self.source).full_scan();
        // anything the snapshot holds that the scan did not see is gone
        for path in snapshot.files().paths() {
            if !batch.added.contains(path) {
                batch.removed.insert(path.clone());
            }
        }
        drop(snapshot);
        self.debouncer.submit(self.reclassify_known(batch));
    }

    /// Report paths the published snapshot already holds as modified, not added.
    ///
    /// A forced rescan or a re-armed path comes back from the source as added. If
    /// it stayed added, a removal merged on top of it would cancel both and leave
    /// the old postings in every later snapshot.
    fn reclassify_known(&self, mut batch: ChangeBatch) -> ChangeBatch {
        let snapshot = self.cell.load();
        let known: Vec<PathBuf> = batch
            .added
            .iter()
            .filter(|p| snapshot.get(p).is_some())
            .cloned()
            .collect();
        for path in known {
            batch.added.remove(&path);
            batch.modified.insert(path);
        }
        batch
    }

    /// Run one pass if a batch is pending. Returns true if a pass ran.
    pub fn run_pending(&self) -> bool {
        let _pass = lock_or_recover(&self.pass_lock);
        match self.debouncer.take() {
            Some(batch) => {
                self.process_locked(batch);
                true
            }
            None => false,
        }
    }

    /// Apply `batch` and publish. Caller holds the pass lock.
    fn process_locked(&self, batch: ChangeBatch) {
        self.indexing.store(true, Ordering::Release);
        let started = Instant::now();
        let previous = self.cell.load();
        let superseded = |path: &std::path::Path| self.debouncer.is_pending_removal(path);

        match self.indexer.apply(&previous, &batch, &superseded) {
            Ok(outcome) => {
                let version = self.publish(outcome, started);
                debug!(version, "Incremental pass published");
            }
            Err(IndexError::IndexInconsistency(reason)) => {
                error!(reason = %reason, "Index inconsistency detected, rebuilding from a full scan");
                self.rebuild_locked(previous.version());
            }
            Err(e) => {
                error!(error = %e, "Index pass failed, rebuilding from a full scan");
                self.rebuild_locked(previous.version());
            }
        }
        self.indexing.store(false, Ordering::Release);
    }

    fn rebuild_locked(&self, after_version: u64) {
        let started = Instant::now();
        let scan = lock_or_recover(&self.source).full_scan();
        let paths: Vec<_> = scan.added.into_iter().collect();
        info!(files = paths.len(), "Rebuilding index");
        let outcome = self.indexer.rebuild(after_version, &paths);
        self.publish(outcome, started);
    }

    fn publish(&self, outcome: PassOutcome, started: Instant) -> u64 {
        let PassOutcome {
            snapshot,
            indexed,
            reused,
            removed,
            skipped,
            failed,
        } = outcome;

        if !failed.is_empty() {
            warn!(count = failed.len(), "Files failed to index, will retry next scan");
            self.debouncer.defer_retry(failed.iter().cloned());
        }

        let published = self.cell.publish(snapshot);
        self.last_indexed_at.store(now_millis(), Ordering::Release);
        info!(
            version = published.version(),
            files = published.file_count(),
            size = %format_bytes(published.files().total_bytes()),
            indexed,
            reused,
            removed,
            skipped,
            failed = failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index pass completed"
        );
        published.version()
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.cell.load()
    }
}

/// Watcher thread body: scan every `interval` until `stop` fires or disconnects.
pub fn watch_loop(pipeline: Arc<IndexPipeline>, interval: Duration, stop: Receiver<()>) {
    info!(
        interval_ms = interval.as_millis() as u64,
        backend = pipeline.source_name(),
        "Watcher started"
    );
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                pipeline.scan_once();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Watcher stopped");
}

/// Indexer thread body: run one pass per pending batch until the debouncer closes.
pub fn index_loop(pipeline: Arc<IndexPipeline>) {
    debug!("Indexer loop started");
    while !pipeline.debouncer.is_closed() {
        if pipeline.debouncer.wait_pending(INDEX_WAIT) {
            pipeline.run_pending();
        }
    }
    debug!("Indexer loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Fingerprint, IndexedFile, SnapshotBuilder};
    use crate::search::file_discovery::FileDiscoveryConfig;
    use crate::search::path_filter::PathFilter;
    use crate::search::watcher::PollingWatcher;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn pipeline(root: &Path) -> IndexPipeline {
        let discovery = FileDiscoveryConfig::new(vec![root.to_path_buf()], PathFilter::default());
        IndexPipeline::new(
            Arc::new(SnapshotCell::default()),
            Indexer::new(discovery.clone(), true),
            Box::new(PollingWatcher::new(discovery)),
        )
    }

    fn root() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn test_rebuild_then_incremental_pass() {
        let (_dir, root) = root();
        fs::write(root.join("a.rs"), "fn alpha() {}").unwrap();
        let pipeline = pipeline(&root);

        pipeline.rebuild_all();
        assert_eq!(pipeline.snapshot().version(), 1);
        assert_eq!(pipeline.snapshot().file_count(), 1);
        assert!(pipeline.last_indexed_at().is_some());

        // primed by the rebuild: nothing new
        assert_eq!(pipeline.scan_once(), 0);

        fs::write(root.join("b.rs"), "fn beta() {}").unwrap();
        assert_eq!(pipeline.scan_once(), 1);
        assert!(pipeline.run_pending());
        assert!(!pipeline.run_pending());
        assert_eq!(pipeline.snapshot().version(), 2);
        assert_eq!(pipeline.snapshot().postings("beta").len(), 1);
    }

    #[test]
    fn test_scans_during_a_pass_make_one_follow_up_pass() {
        let (_dir, root) = root();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();

        for i in 0..5 {
            fs::write(root.join(format!("f{i}.txt")), format!("word{i}")).unwrap();
            pipeline.scan_once();
        }
        assert_eq!(pipeline.debouncer().pending_len(), 5);
        assert!(pipeline.run_pending());
        assert!(!pipeline.run_pending());

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.file_count(), 5);
    }

    #[test]
    fn test_refresh_publishes_before_returning() {
        let (_dir, root) = root();
        fs::write(root.join("a.rs"), "fn alpha() {}").unwrap();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();

        fs::remove_file(root.join("a.rs")).unwrap();
        fs::write(root.join("c.rs"), "fn gamma() {}").unwrap();
        let version = pipeline.refresh();

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.version(), version);
        assert!(snapshot.postings("alpha").is_empty());
        assert_eq!(snapshot.postings("gamma").len(), 1);
    }

    #[test]
    fn test_failed_paths_are_rescanned() {
        let (_dir, root) = root();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();

        let path = root.join("later.rs");
        fs::write(&path, "fn later() {}").unwrap();
        // simulate a previous failure for a file the watcher already knows
        pipeline.scan_once();
        pipeline.debouncer().take();
        pipeline.debouncer().defer_retry(vec![path.clone()]);

        assert_eq!(pipeline.scan_once(), 1);
        assert!(pipeline.run_pending());
        assert_eq!(pipeline.snapshot().postings("later").len(), 1);
    }

    #[test]
    fn test_deleted_after_forced_rescan_is_removed() {
        let (_dir, root) = root();
        let ghost = root.join("ghost.rs");
        fs::write(&ghost, "fn ghost() {}").unwrap();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();

        // the rescan is queued, then the file goes before any pass takes it
        pipeline.queue_full_scan();
        fs::remove_file(&ghost).unwrap();
        pipeline.scan_once();
        assert!(pipeline.debouncer().is_pending_removal(&ghost));
        assert!(pipeline.run_pending());

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.file_count(), 0);
        assert!(snapshot.postings("ghost").is_empty());
    }

    #[test]
    fn test_deleted_after_retry_is_removed() {
        let (_dir, root) = root();
        let ghost = root.join("ghost.rs");
        fs::write(&ghost, "fn ghost() {}").unwrap();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();

        pipeline.debouncer().defer_retry(vec![ghost.clone()]);
        assert_eq!(pipeline.scan_once(), 1);
        fs::remove_file(&ghost).unwrap();
        pipeline.scan_once();
        assert!(pipeline.run_pending());

        let snapshot = pipeline.snapshot();
        assert_eq!(snapshot.file_count(), 0);
        assert!(snapshot.postings("ghost").is_empty());
        // nothing left to converge
        pipeline.scan_once();
        assert!(!pipeline.run_pending());
    }

    #[test]
    fn test_known_paths_are_reported_as_modified() {
        let (_dir, root) = root();
        fs::write(root.join("a.rs"), "fn alpha() {}").unwrap();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();
        fs::write(root.join("b.rs"), "fn beta() {}").unwrap();

        let mut batch = ChangeBatch::new();
        batch.added.insert(root.join("a.rs"));
        batch.added.insert(root.join("b.rs"));
        let batch = pipeline.reclassify_known(batch);

        assert!(batch.modified.contains(&root.join("a.rs")));
        assert!(batch.added.contains(&root.join("b.rs")));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_inconsistent_pass_rebuilds_from_scratch() {
        let (_dir, root) = root();
        let a = root.join("a.rs");
        fs::write(&a, "fn alpha() {}").unwrap();
        fs::write(root.join("b.rs"), "fn beta() {}").unwrap();
        let pipeline = pipeline(&root);
        pipeline.rebuild_all();

        // publish an entry whose record disagrees with its postings, under the
        // file's real fingerprint so the next pass reuses it as unchanged
        let current = pipeline.snapshot();
        let mut builder = SnapshotBuilder::from_previous(&current);
        let fingerprint = Fingerprint::of(&a).unwrap();
        let bad = IndexedFile::from_text(a.clone(), "a.rs".into(), fingerprint, "fn alpha() {}")
            .corrupt_for_test();
        builder.insert(Arc::new(bad));
        drop(current);
        let corrupt = pipeline.cell.publish(builder.build());
        assert!(corrupt.verify(&[a.clone()]).is_err());

        let mut batch = ChangeBatch::new();
        batch.modified.insert(a.clone());
        pipeline.debouncer().submit(batch);
        assert!(pipeline.run_pending());

        let rebuilt = pipeline.snapshot();
        assert!(rebuilt.version() > corrupt.version());
        assert_eq!(rebuilt.files().shared_shards(corrupt.files()), 0);
        assert!(!Arc::ptr_eq(rebuilt.get(&a).unwrap(), corrupt.get(&a).unwrap()));
        assert!(rebuilt.verify(&[a.clone(), root.join("b.rs")]).is_ok());
        assert_eq!(rebuilt.file_count(), 2);
        assert_eq!(rebuilt.postings("alpha").len(), 1);
        assert_eq!(rebuilt.postings("beta").len(), 1);
    }

    #[test]
    fn test_loops_stop() {
        let (_dir, root) = root();
        let pipeline = Arc::new(pipeline(&root));
        let (tx, rx) = std::sync::mpsc::channel();

        let watcher = {
            let p = Arc::clone(&pipeline);
            std::thread::spawn(move || watch_loop(p, Duration::from_millis(20), rx))
        };
        let indexer = {
            let p = Arc::clone(&pipeline);
            std::thread::spawn(move || index_loop(p))
        };

        fs::write(root.join("x.rs"), "fn x() {}").unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while pipeline.snapshot().file_count() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(pipeline.snapshot().file_count(), 1);
        let record = pipeline.snapshot().get(&root.join("x.rs")).map(|f| f.record().fingerprint);
        assert_eq!(record, Some(Fingerprint::of(&root.join("x.rs")).unwrap()));

        tx.send(()).unwrap();
        pipeline.debouncer().close();
        watcher.join().unwrap();
        indexer.join().unwrap();
    }
}
