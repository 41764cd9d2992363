//! Shutdown dump of the buffer state.
//!
//! ```text
//! header   4 x i32   trie node counter, pending free node (0 = none),
//!                    bucket counter, pending free bucket (0 = none)
//! nodes    max_trie_nodes x (child0 i16, child1 i16, edge_len i16)
//! buckets  (max_buckets + 1) x (keys i32, lcp_bits i32,
//!                               bucket_capacity x (key u32, doc u32))
//! ```
//!
//! All values are little-endian; unused cells are zero. The trie is written
//! first, the bucket array right after it. Nothing reads the file back.

use super::key_buffer::KeyBuffer;
use bytes::{BufMut, BytesMut};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;
use triebulk_common::Result;

impl KeyBuffer {
    /// Size of the snapshot in bytes.
    pub fn snapshot_len(&self) -> usize {
        let header = 4 * 4;
        let nodes = self.trie.max_nodes() * 3 * 2;
        let bucket = 2 * 4 + self.config.bucket_capacity * 8;
        header + nodes + self.buckets.len() * bucket
    }

    /// Encodes the trie and every bucket slot.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.snapshot_len());

        buf.put_i32_le(self.trie.next_id() as i32);
        buf.put_i32_le(self.trie.pending_free().unwrap_or(0) as i32);
        buf.put_i32_le(self.next_bucket as i32);
        buf.put_i32_le(self.free_buckets.last().copied().unwrap_or(0) as i32);

        for id in 0..self.trie.max_nodes() {
            let node = self.trie.node(id as u16);
            buf.put_i16_le(node.children[0].to_raw());
            buf.put_i16_le(node.children[1].to_raw());
            buf.put_i16_le(node.edge_len as i16);
        }

        for bucket in &self.buckets {
            buf.put_i32_le(bucket.len() as i32);
            buf.put_i32_le(bucket.lcp_bits() as i32);
            for posting in bucket.entries() {
                buf.put_u32_le(posting.key);
                buf.put_u32_le(posting.doc_id);
            }
            buf.put_bytes(0, (bucket.capacity() - bucket.len()) * 8);
        }

        buf.to_vec()
    }

    /// Writes the snapshot to `path`, replacing any previous one.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let bytes = self.snapshot_bytes();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        info!(
            path = %path.display(),
            bytes = bytes.len(),
            buckets = self.live_buckets(),
            "wrote buffer snapshot"
        );
        Ok(())
    }
}
