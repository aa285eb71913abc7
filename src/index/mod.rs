pub mod fingerprint;
pub mod snapshot;
pub mod tokenizer;

pub use fingerprint::{ChangeBatch, Fingerprint, FingerprintTable};
pub use snapshot::{
    FileRecord, FileTable, IndexSnapshot, IndexedFile, SnapshotBuilder, SnapshotCell,
    SnapshotState, SHARD_COUNT,
};
pub use tokenizer::{index_lines, tokens, FilePostings};
