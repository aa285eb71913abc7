use crate::error::IndexError;
use crate::index::{IndexSnapshot, IndexedFile, SnapshotCell};
use crate::search::query::{CompiledQuery, Query};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;

/// One matching line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub path: PathBuf,
    /// Path relative to its root, forward slashes
    pub relative_path: String,
    /// 1-based
    pub line_number: usize,
    pub line: String,
}

/// Read side of the index. Holds no lock; every call works on the snapshot that
/// was current when it started.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    cell: Arc<SnapshotCell>,
    max_results: usize,
}

impl SearchEngine {
    pub fn new(cell: Arc<SnapshotCell>, max_results: usize) -> Self {
        Self { cell, max_results }
    }

    /// Run `query` against the current snapshot.
    pub fn search(&self, query: &Query) -> Result<Vec<SearchResult>, IndexError> {
        let compiled = query.compile()?;
        let snapshot = self.cell.load();
        Ok(search_snapshot(&snapshot, &compiled, self.max_results))
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.cell.load()
    }
}

/// Run a compiled query against one snapshot.
///
/// Postings are kept per file, not in a shared token-keyed list, so publishing a
/// pass only touches the changed files' entries. The price is on the read side: a
/// query intersects its terms inside every candidate file (in parallel), so its
/// cost grows with the file count even for a token that occurs nowhere.
///
/// Files are ranked by number of matching lines (descending), then path
/// (ascending); lines within a file are ascending. `default_limit` applies when
/// the query sets no limit.
pub fn search_snapshot(
    snapshot: &IndexSnapshot,
    query: &CompiledQuery,
    default_limit: usize,
) -> Vec<SearchResult> {
    let candidates: Vec<&Arc<IndexedFile>> = snapshot
        .files()
        .iter()
        .filter(|f| query.accepts_path(&f.record().relative_path))
        .collect();

    let mut hits: Vec<(&Arc<IndexedFile>, Vec<usize>)> = candidates
        .par_iter()
        .filter_map(|file| query.match_file(file).map(|lines| (*file, lines)))
        .collect();

    hits.sort_by(|(a, a_lines), (b, b_lines)| {
        (Reverse(a_lines.len()), a.path()).cmp(&(Reverse(b_lines.len()), b.path()))
    });

    let limit = query.limit.unwrap_or(default_limit);
    hits.into_iter()
        .flat_map(|(file, lines)| {
            lines.into_iter().filter_map(move |n| {
                file.line(n).map(|text| SearchResult {
                    path: file.path().to_path_buf(),
                    relative_path: file.record().relative_path.clone(),
                    line_number: n,
                    line: text.to_string(),
                })
            })
        })
        .take(limit)
        .collect()
}
