//! Case-insensitive word-boundary tokenizer.
//!
//! A token is a maximal run of alphanumeric characters or `_`, lowercased.

use rustc_hash::FxHashMap;

/// Token -> 1-based line numbers (ascending, deduplicated) for one file.
pub type FilePostings = FxHashMap<String, Vec<usize>>;

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Iterate over the lowercase tokens of `text`.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !is_token_char(c))
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

/// Build postings for the given lines.
pub fn index_lines<S: AsRef<str>>(lines: &[S]) -> FilePostings {
    let mut postings = FilePostings::default();
    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;
        for token in tokens(line.as_ref()) {
            let lines = postings.entry(token).or_default();
            if lines.last() != Some(&line_number) {
                lines.push(line_number);
            }
        }
    }
    postings
}
