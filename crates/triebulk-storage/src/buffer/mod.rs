//! In-memory key buffer.
//!
//! Incoming postings are grouped into buckets by key prefix. Buckets hang
//! off a path-compressed binary trie over the key bits:
//!
//! ```text
//!            root (branches on bit 0)
//!           /                     \
//!      node (edge 6)            bucket {1xxx..}
//!       /        \
//!  bucket       bucket
//!  {0000 000..} {0000 001..}
//! ```
//!
//! Buckets leave the buffer as sorted batches through a [`KeySink`], which
//! is the B-tree in production and a plain `Vec` in tests.

mod bucket;
mod key_buffer;
mod snapshot;
mod trie;

pub use bucket::Bucket;
pub use key_buffer::{BufferStats, KeyBuffer};
pub use trie::{BucketId, ChildRef, DeepestNode, TopTrie, TrieNode, TrieNodeId, TRIE_ROOT};

use triebulk_common::{DocId, Key, Posting, Result};

/// Receiver of postings flushed from the buffer.
pub trait KeySink {
    /// Accepts one posting. Postings of one batch arrive in key order.
    fn insert(&mut self, key: Key, doc_id: DocId) -> Result<()>;

    /// Marks the end of a batch. The next posting may be smaller than the
    /// last one.
    fn end_batch(&mut self);
}

impl KeySink for Vec<Posting> {
    fn insert(&mut self, key: Key, doc_id: DocId) -> Result<()> {
        self.push(Posting::new(key, doc_id));
        Ok(())
    }

    fn end_batch(&mut self) {}
}
