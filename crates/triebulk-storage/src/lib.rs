//! Storage engine for triebulk.
//!
//! This crate provides:
//! - Node record file and size file I/O
//! - Disk-resident B-tree with sorted batch insertion
//! - Trie-organized key buffer that groups postings by key prefix
//! - Document sources, word hashing and the ingest driver

mod btree;
mod buffer;
mod disk;
mod ingest;

pub use btree::{
    BTreeIndex, BTreeNode, Entry, IndexStats, KeyGroup, NodeStore, SearchPath, StoreStats,
};
pub use buffer::{
    Bucket, BucketId, BufferStats, ChildRef, DeepestNode, KeyBuffer, KeySink, TopTrie, TrieNode,
    TrieNodeId, TRIE_ROOT,
};
pub use disk::{NodeFile, NodeFileConfig};
pub use ingest::{
    hash_word, Document, DocumentSource, FileRangeSource, IngestDriver, IngestStats, VecSource,
    WordHasher, STOP_WORDS,
};
