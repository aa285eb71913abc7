//! Path filtering using glob patterns for include/exclude file matching.
//!
//! Used twice: by the scanner (configured include/exclude globs) and by queries
//! (an optional glob that restricts candidates before postings are consulted).
//! Patterns are matched against root-relative paths with forward slashes.

use crate::error::IndexError;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Filters files by path patterns using glob matching.
///
/// - Include patterns: a path must match at least one (if any are given)
/// - Exclude patterns: a path must match none
#[derive(Debug, Default, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

fn build_set(kind: &str, patterns: &[String]) -> Result<Option<GlobSet>, IndexError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            IndexError::MalformedQuery(format!("invalid {} glob '{}': {}", kind, pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| IndexError::MalformedQuery(format!("invalid {} globs: {}", kind, e)))
}

impl PathFilter {
    /// Create a filter. Empty lists mean "match all" / "exclude none".
    pub fn new(include_patterns: &[String], exclude_patterns: &[String]) -> Result<Self, IndexError> {
        Ok(Self {
            include: build_set("include", include_patterns)?,
            exclude: build_set("exclude", exclude_patterns)?,
        })
    }

    /// Filter that accepts a path iff it matches `pattern`. Comma or semicolon
    /// separated alternatives are allowed (`"src/**/*.rs, **/*.js"`).
    pub fn from_query_glob(pattern: &str) -> Result<Self, IndexError> {
        let patterns = crate::config::split_list(pattern);
        if patterns.is_empty() {
            return Err(IndexError::MalformedQuery("empty glob".to_string()));
        }
        Self::new(&patterns, &[])
    }

    /// True if the path is included and not excluded.
    pub fn matches(&self, path: &str) -> bool {
        let included = match &self.include {
            Some(set) => set.is_match(path),
            None => true,
        };
        if !included {
            return false;
        }
        match &self.exclude {
            Some(set) => !set.is_match(path),
            None => true,
        }
    }

    /// True if `path` (a directory) is excluded outright, so a walk may skip it.
    pub fn excludes_dir(&self, path: &str) -> bool {
        match &self.exclude {
            Some(set) => set.is_match(path) || set.is_match(format!("{}/", path)),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }
}
