pub mod background_indexer;
pub mod debouncer;
pub mod engine;
pub mod file_discovery;
pub mod indexer;
pub mod path_filter;
pub mod query;
pub mod service;
pub mod watcher;

pub use background_indexer::{index_loop, watch_loop, IndexPipeline};
pub use debouncer::{merge, Debouncer};
pub use engine::{search_snapshot, SearchEngine, SearchResult};
pub use file_discovery::{DiscoveredFile, FileDiscoveryConfig, FileDiscoveryIterator};
pub use indexer::{Indexer, PassOutcome};
pub use path_filter::PathFilter;
pub use query::{CompiledQuery, Query, TermMatcher};
pub use service::{IndexService, IndexStatus};
pub use watcher::{ChangeSource, NotifyWatcher, PollingWatcher};
