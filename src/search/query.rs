//! Query description and compilation.
//!
//! A [`Query`] is plain data (what the caller asked for). [`Query::compile`] turns it
//! into a [`CompiledQuery`], failing with [`IndexError::MalformedQuery`] before any
//! snapshot is consulted.

use crate::error::IndexError;
use crate::index::{tokens, IndexedFile};
use crate::search::path_filter::PathFilter;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// A search request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Terms, AND-combined
    pub terms: Vec<String>,
    /// Optional glob (or comma-separated globs) over root-relative paths
    #[serde(default)]
    pub glob: Option<String>,
    /// Treat each term as a regular expression
    #[serde(default)]
    pub regex: bool,
    /// Maximum number of result lines
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_glob(mut self, glob: impl Into<String>) -> Self {
        self.glob = Some(glob.into());
        self
    }

    pub fn with_regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn compile(&self) -> Result<CompiledQuery, IndexError> {
        let mut matchers = Vec::with_capacity(self.terms.len());
        if self.regex {
            for term in self.terms.iter().filter(|t| !t.is_empty()) {
                let pattern = RegexBuilder::new(term)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        IndexError::MalformedQuery(format!("invalid regex '{}': {}", term, e))
                    })?;
                matchers.push(TermMatcher::Pattern(pattern));
            }
        } else {
            for term in &self.terms {
                for token in tokens(term) {
                    let matcher = TermMatcher::Token(token);
                    if !matchers.contains(&matcher) {
                        matchers.push(matcher);
                    }
                }
            }
        }
        if matchers.is_empty() {
            return Err(IndexError::MalformedQuery(
                "query has no searchable terms".to_string(),
            ));
        }

        let filter = match self.glob.as_deref() {
            Some(glob) => Some(PathFilter::from_query_glob(glob)?),
            None => None,
        };

        Ok(CompiledQuery {
            matchers,
            filter,
            limit: self.limit,
        })
    }
}

/// One AND term.
#[derive(Debug, Clone)]
pub enum TermMatcher {
    /// Exact lowercase token
    Token(String),
    Pattern(Regex),
}

impl PartialEq for TermMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TermMatcher::Token(a), TermMatcher::Token(b)) => a == b,
            (TermMatcher::Pattern(a), TermMatcher::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl TermMatcher {
    /// 1-based line numbers of `file` this term matches, ascending.
    pub fn matching_lines(&self, file: &IndexedFile) -> Vec<usize> {
        match self {
            TermMatcher::Token(token) => file.lines_with_token(token).to_vec(),
            TermMatcher::Pattern(pattern) => file
                .lines()
                .iter()
                .enumerate()
                .filter(|(_, line)| pattern.is_match(line))
                .map(|(i, _)| i + 1)
                .collect(),
        }
    }
}

/// A validated query, ready to run against a snapshot.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub matchers: Vec<TermMatcher>,
    pub filter: Option<PathFilter>,
    pub limit: Option<usize>,
}

impl CompiledQuery {
    pub fn accepts_path(&self, relative_path: &str) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |f| f.matches(relative_path))
    }

    /// Lines of `file` matching any term, or `None` if some term matches nowhere.
    pub fn match_file(&self, file: &IndexedFile) -> Option<Vec<usize>> {
        let mut lines = Vec::new();
        for matcher in &self.matchers {
            let hits = matcher.matching_lines(file);
            if hits.is_empty() {
                return None;
            }
            lines.extend(hits);
        }
        lines.sort_unstable();
        lines.dedup();
        Some(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Fingerprint;
    use std::path::PathBuf;

    fn file(text: &str) -> IndexedFile {
        IndexedFile::from_text(
            PathBuf::from("/r/a.js"),
            "a.js".into(),
            Fingerprint { size: 1, mtime_ns: 1 },
            text,
        )
    }

    #[test]
    fn test_terms_are_tokenized() {
        let compiled = Query::new(["loadConversations", "foo.bar", "FOO"]).compile().unwrap();
        assert_eq!(
            compiled.matchers,
            vec![
                TermMatcher::Token("loadconversations".into()),
                TermMatcher::Token("foo".into()),
                TermMatcher::Token("bar".into()),
            ]
        );
    }

    #[test]
    fn test_empty_query_is_malformed() {
        assert!(matches!(
            Query::new(Vec::<String>::new()).compile(),
            Err(IndexError::MalformedQuery(_))
        ));
        assert!(matches!(
            Query::new(["  ...  "]).compile(),
            Err(IndexError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_invalid_regex_and_glob() {
        let err = Query::new(["fn ("]).with_regex(true).compile().unwrap_err();
        assert!(matches!(err, IndexError::MalformedQuery(_)));
        let err = Query::new(["ok"]).with_glob("src/[bad").compile().unwrap_err();
        assert!(matches!(err, IndexError::MalformedQuery(_)));
    }

    #[test]
    fn test_match_file_requires_every_term() {
        let f = file("async function x() {}\nconst y = 1;\nloadConversations();\n");
        let both = Query::new(["async", "loadConversations"]).compile().unwrap();
        assert_eq!(both.match_file(&f), Some(vec![1, 3]));

        let missing = Query::new(["async", "absent"]).compile().unwrap();
        assert_eq!(missing.match_file(&f), None);
    }

    #[test]
    fn test_regex_matches_lines_case_insensitively() {
        let f = file("fn Alpha() {}\nlet beta = 2;\nfn gamma() {}\n");
        let compiled = Query::new([r"^fn \w+"]).with_regex(true).compile().unwrap();
        assert_eq!(compiled.match_file(&f), Some(vec![1, 3]));

        let compiled = Query::new(["ALPHA"]).with_regex(true).compile().unwrap();
        assert_eq!(compiled.match_file(&f), Some(vec![1]));
    }

    #[test]
    fn test_glob_restricts_paths() {
        let compiled = Query::new(["x"]).with_glob("src/**/*.rs").compile().unwrap();
        assert!(compiled.accepts_path("src/lib.rs"));
        assert!(!compiled.accepts_path("web/app.js"));
        assert!(Query::new(["x"]).compile().unwrap().accepts_path("anything"));
    }
}
