//! Integration tests for Live Code Search
//!
//! These tests start a real `IndexService` over a temporary directory, change files
//! on disk, and check what searches observe once the background threads catch up.

use anyhow::Result;
use live_code_search::{
    config::{Config, WatchBackend},
    error::IndexError,
    search::{IndexService, Query},
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Upper bound for anything the background threads must do.
const SETTLE: Duration = Duration::from_secs(10);

const JS_FEATURE_FILE: &str = r#"// nova funcionalidade
export function minhaNovaFuncao(args) {
    return args.map((a) => a * 2);
}
"#;

const CONVERSATIONS_FILE: &str = r#"import { api } from "./api";

export async function fetchAll() {
    return api.get("/all");
}

export function loadConversations(store) {
    return store.conversations;
}
"#;

const ASYNC_ONLY_FILE: &str = r#"export async function ping() {
    return "pong";
}
"#;

fn config_for(root: &Path, interval_secs: f64) -> Config {
    let mut config = Config::default();
    config.indexer.roots = vec![root.to_string_lossy().into_owned()];
    config.indexer.interval_secs = interval_secs;
    config
}

fn start(root: &Path) -> Result<IndexService> {
    Ok(IndexService::start(config_for(root, 0.2))?)
}

/// Poll `check` until it holds or `SETTLE` elapses.
fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    check()
}

fn hits(service: &IndexService, terms: &[&str]) -> usize {
    service
        .search(&Query::new(terms.iter().copied()))
        .map(|r| r.len())
        .unwrap_or(0)
}

#[test]
fn test_new_file_is_found_then_forgotten() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("README.md"), "# project\n")?;
    let service = start(dir.path())?;
    assert_eq!(hits(&service, &["minhaNovaFuncao"]), 0);

    let feature = dir.path().join("novo_feature.js");
    fs::write(&feature, JS_FEATURE_FILE)?;
    assert!(wait_for(|| hits(&service, &["minhaNovaFuncao"]) > 0));

    let results = service.search(&Query::new(["minhaNovaFuncao"]))?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].relative_path, "novo_feature.js");
    assert_eq!(results[0].line_number, 2);
    assert_eq!(results[0].line, "export function minhaNovaFuncao(args) {");

    fs::remove_file(&feature)?;
    assert!(wait_for(|| hits(&service, &["minhaNovaFuncao"]) == 0));
    assert_eq!(service.status().file_count, 1);
    Ok(())
}

#[test]
fn test_multi_term_queries_are_and_combined() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("a.js"), CONVERSATIONS_FILE)?;
    fs::write(dir.path().join("b.js"), ASYNC_ONLY_FILE)?;
    let service = start(dir.path())?;

    let results = service.search(&Query::new(["async", "loadConversations"]))?;
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.relative_path == "a.js"));
    let lines: Vec<usize> = results.iter().map(|r| r.line_number).collect();
    assert_eq!(lines, vec![3, 7]);

    // a single term matches both, a.js ranks by path on equal line counts
    let results = service.search(&Query::new(["async"]))?;
    let paths: Vec<&str> = results.iter().map(|r| r.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["a.js", "b.js"]);
    Ok(())
}

#[test]
fn test_modified_file_replaces_old_postings() -> Result<()> {
    let dir = TempDir::new()?;
    let file = dir.path().join("lib.rs");
    fs::write(&file, "fn original_name() {}\n")?;
    let service = start(dir.path())?;
    assert_eq!(hits(&service, &["original_name"]), 1);

    fs::write(&file, "fn renamed_function() {}\n// padding to change the size\n")?;
    assert!(wait_for(|| hits(&service, &["renamed_function"]) == 1));
    assert_eq!(hits(&service, &["original_name"]), 0);
    Ok(())
}

#[test]
fn test_refresh_bypasses_the_timer() -> Result<()> {
    let dir = TempDir::new()?;
    let service = IndexService::start(config_for(dir.path(), 3600.0))?;
    let before = service.status().version;

    fs::write(dir.path().join("late.py"), "def arrived_late():\n    pass\n")?;
    let version = service.refresh();

    assert!(version > before);
    assert_eq!(hits(&service, &["arrived_late"]), 1);
    assert_eq!(service.status().pending_batch_size, 0);
    Ok(())
}

#[test]
fn test_burst_of_changes_settles() -> Result<()> {
    let dir = TempDir::new()?;
    let service = start(dir.path())?;
    let start_version = service.status().version;

    for i in 0..50 {
        fs::write(
            dir.path().join(format!("burst_{i}.txt")),
            format!("shared_burst_token unique_{i}\n"),
        )?;
    }

    assert!(wait_for(|| {
        let status = service.status();
        status.file_count == 50 && status.pending_batch_size == 0 && !status.indexing
    }));
    let results = service.search(&Query::new(["shared_burst_token"]).with_limit(1000))?;
    assert_eq!(results.len(), 50);
    assert_eq!(hits(&service, &["unique_42"]), 1);
    // far fewer passes than files
    assert!(service.status().version - start_version < 50);
    Ok(())
}

#[test]
fn test_searches_see_consistent_snapshots_while_indexing() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("stable.rs"), "const STABLE_MARKER: u8 = 1;\n")?;
    let service = Arc::new(start(dir.path())?);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut calls = 0usize;
                while !done.load(Ordering::Acquire) {
                    let results = service
                        .search(&Query::new(["stable_marker"]))
                        .expect("query is valid");
                    assert_eq!(results.len(), 1);
                    assert_eq!(results[0].relative_path, "stable.rs");
                    calls += 1;
                }
                calls
            })
        })
        .collect();

    for i in 0..20 {
        fs::write(dir.path().join(format!("churn_{i}.rs")), format!("fn churn_{i}() {{}}\n"))?;
        thread::sleep(Duration::from_millis(20));
    }
    assert!(wait_for(|| service.status().file_count == 21));
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().expect("reader panicked") > 0);
    }
    Ok(())
}

#[test]
fn test_glob_and_regex_queries() -> Result<()> {
    let dir = TempDir::new()?;
    fs::create_dir_all(dir.path().join("src"))?;
    fs::create_dir_all(dir.path().join("web"))?;
    fs::write(dir.path().join("src/handler.rs"), "pub fn handle_request() {}\n")?;
    fs::write(dir.path().join("web/handler.js"), "function handle_request() {}\n")?;
    let service = start(dir.path())?;

    let results = service.search(&Query::new(["handle_request"]).with_glob("src/**"))?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].relative_path, "src/handler.rs");

    let results = service.search(&Query::new([r"^function\s+handle_"]).with_regex(true))?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].relative_path, "web/handler.js");

    let err = service
        .search(&Query::new(["handle_(request"]).with_regex(true))
        .unwrap_err();
    assert!(matches!(err, IndexError::MalformedQuery(_)));
    Ok(())
}

#[test]
fn test_excluded_and_binary_files_are_not_indexed() -> Result<()> {
    let dir = TempDir::new()?;
    fs::create_dir_all(dir.path().join("node_modules/pkg"))?;
    fs::write(dir.path().join("node_modules/pkg/index.js"), "vendored_token\n")?;
    fs::write(dir.path().join("logo.png"), "vendored_token\n")?;
    fs::write(dir.path().join("blob.dat"), b"vendored_token\0\x01\x02")?;
    fs::write(dir.path().join("app.js"), "own_token\n")?;
    let service = start(dir.path())?;

    assert_eq!(hits(&service, &["own_token"]), 1);
    assert_eq!(hits(&service, &["vendored_token"]), 0);
    Ok(())
}

#[test]
fn test_non_utf8_file_is_transcoded() -> Result<()> {
    let dir = TempDir::new()?;
    // longer text for reliable detection
    let text = "日本語のテストです。これは日本語のテキストです。";
    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(text);
    fs::write(dir.path().join("shift_jis_file.txt"), &*encoded)?;
    let service = start(dir.path())?;

    let results = service.search(&Query::new(["日本語"]).with_regex(true))?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].line, text);
    Ok(())
}

#[test]
fn test_status_reports_service_state() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("one.txt"), "one\n")?;
    fs::write(dir.path().join("two.txt"), "two\n")?;
    let mut service = start(dir.path())?;

    let status = service.status();
    assert_eq!(status.file_count, 2);
    assert!(status.running);
    assert!(status.last_indexed_at.is_some());
    assert_eq!(status.roots, vec![dir.path().canonicalize()?]);

    let json = serde_json::to_value(&status)?;
    assert_eq!(json["file_count"], 2);
    assert_eq!(json["backend"], "poll");

    service.stop();
    assert!(!service.status().running);
    Ok(())
}

#[test]
fn test_notify_backend_detects_changes() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config_for(dir.path(), 0.2);
    config.indexer.backend = WatchBackend::Notify;
    let service = IndexService::start(config)?;
    assert_eq!(service.status().backend, "notify");

    let file = dir.path().join("pushed.rs");
    fs::write(&file, "fn pushed_by_event() {}\n")?;
    assert!(wait_for(|| hits(&service, &["pushed_by_event"]) == 1));

    fs::remove_file(&file)?;
    assert!(wait_for(|| hits(&service, &["pushed_by_event"]) == 0));
    Ok(())
}

#[test]
fn test_missing_root_prevents_start() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("not_created");
    let result = IndexService::start(config_for(&missing, 0.2));
    assert!(matches!(result, Err(IndexError::WatcherStartup { .. })));
}
