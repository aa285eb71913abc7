//! Error types for the indexing subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the watcher, indexer and search engine.
///
/// Per-file failures (`FileAccess`) are contained by the component that hit them;
/// only `MalformedQuery` ever reaches a search caller, and only `WatcherStartup`
/// prevents the service from running.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A file could not be read during a scan or an indexing pass.
    #[error("cannot access {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid regex or glob in a query.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// Postings and file records disagree; the incremental state cannot be trusted.
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    /// A configured root is missing or unusable at startup.
    #[error("cannot watch {path}: {reason}")]
    WatcherStartup { path: PathBuf, reason: String },
}

impl IndexError {
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::FileAccess {
            path: path.into(),
            source,
        }
    }

    /// True for errors that are retried on the next cycle rather than surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::FileAccess { .. })
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::WatcherStartup {
            path: PathBuf::from("/missing/root"),
            reason: "does not exist".to_string(),
        };
        assert!(err.to_string().contains("/missing/root"));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_file_access_is_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = IndexError::file_access("/tmp/x.rs", io_err);
        assert!(err.is_transient());
        assert!(!IndexError::MalformedQuery("bad".into()).is_transient());
    }
}
