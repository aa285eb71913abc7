//! Auto-refreshing lexical index over one or more source trees.
//!
//! A watcher detects changed files by fingerprint, a debouncer folds bursts of
//! changes into one pending batch, and a single indexer publishes immutable
//! snapshots that any number of searches read without locking.

pub mod config;
pub mod error;
pub mod index;
pub mod search;
pub mod telemetry;
pub mod utils;

pub use config::Config;
pub use error::IndexError;
pub use search::{IndexService, IndexStatus, Query, SearchResult};
