//! The key buffer: buckets routed by a path-compressed trie.

use super::bucket::Bucket;
use super::trie::{BucketId, ChildRef, TopTrie, TrieNode, TrieNodeId, TRIE_ROOT};
use super::KeySink;
use tracing::{debug, trace};
use triebulk_common::bits::{get_bit, lcp_with_next_bits};
use triebulk_common::{BufferConfig, DocId, Key, Posting, Result, TrieBulkError, KEY_BITS};

/// Counters describing buffer behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Postings accepted into a bucket.
    pub keys_buffered: u64,
    pub bucket_splits: u64,
    /// Buckets flushed to make room.
    pub evictions: u64,
    /// Full buckets of one repeated key that were flushed down to one entry.
    pub equal_key_transfers: u64,
    /// Postings handed to the sink, by any route.
    pub keys_transferred: u64,
}

/// One level of the descent: a trie node, its depth and the child taken.
#[derive(Debug, Clone, Copy)]
struct Step {
    node: TrieNodeId,
    depth: u32,
    dir: usize,
}

enum Placement {
    Stored,
    Retry,
}

/// In-memory buffer that groups postings by key prefix.
///
/// Keys descend a PATRICIA trie to a bucket. A full bucket is split on the
/// first bit after its common prefix; when no bucket or trie node is left,
/// the pair of sibling buckets sharing the longest prefix gives up its
/// smaller member, which is written to the [`KeySink`] as one sorted batch.
pub struct KeyBuffer {
    pub(super) config: BufferConfig,
    pub(super) trie: TopTrie,
    /// Indexed by bucket id; slot 0 is unused.
    pub(super) buckets: Vec<Bucket>,
    /// Next never-used bucket id.
    pub(super) next_bucket: BucketId,
    /// Released bucket ids, kept as a stack and reused before `next_bucket`.
    pub(super) free_buckets: Vec<BucketId>,
    stats: BufferStats,
}

impl KeyBuffer {
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let buckets = (0..=config.max_buckets)
            .map(|_| Bucket::new(config.bucket_capacity))
            .collect();
        Ok(Self {
            trie: TopTrie::new(config.max_trie_nodes()),
            buckets,
            next_bucket: 1,
            free_buckets: Vec::new(),
            config,
            stats: BufferStats::default(),
        })
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn trie(&self) -> &TopTrie {
        &self.trie
    }

    /// Returns a bucket by id.
    pub fn bucket(&self, id: BucketId) -> &Bucket {
        &self.buckets[id as usize]
    }

    /// Number of buckets in use.
    pub fn live_buckets(&self) -> usize {
        self.next_bucket as usize - 1 - self.free_buckets.len()
    }

    /// Number of postings currently held.
    pub fn buffered(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    /// Buffers one posting, flushing to `sink` as needed to make room.
    pub fn insert<S: KeySink>(&mut self, key: Key, doc_id: DocId, sink: &mut S) -> Result<()> {
        // Every retry follows a split or a flush; both are bounded.
        let max_attempts = 2 * (KEY_BITS as usize + self.config.max_buckets) + 4;
        for _ in 0..max_attempts {
            if let Placement::Stored = self.place(key, doc_id, sink)? {
                self.stats.keys_buffered += 1;
                return Ok(());
            }
        }
        Err(TrieBulkError::BufferExhausted(format!(
            "key {:#010x} still unplaced after {} attempts",
            key, max_attempts
        )))
    }

    /// Flushes every bucket to `sink` in trie order and empties the buffer.
    /// Returns the number of postings flushed.
    pub fn drain_all<S: KeySink>(&mut self, sink: &mut S) -> Result<u64> {
        let before = self.stats.keys_transferred;
        let mut stack = vec![
            self.trie.root().children[1],
            self.trie.root().children[0],
        ];
        while let Some(child) = stack.pop() {
            match child {
                ChildRef::Empty => {}
                ChildRef::Bucket(id) => self.flush_bucket(id, sink)?,
                ChildRef::Node(node) => {
                    let children = self.trie.node(node).children;
                    stack.push(children[1]);
                    stack.push(children[0]);
                }
            }
        }
        self.reset();

        let drained = self.stats.keys_transferred - before;
        debug!(postings = drained, "drained key buffer");
        Ok(drained)
    }

    /// Drops every bucket and trie node without flushing.
    pub fn reset(&mut self) {
        self.trie.reset();
        self.buckets.iter_mut().for_each(|b| {
            b.take_all();
        });
        self.next_bucket = 1;
        self.free_buckets.clear();
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// One attempt at storing the posting. `Retry` means the buffer was
    /// reshaped (split or flush) and the descent must start over.
    fn place<S: KeySink>(&mut self, key: Key, doc_id: DocId, sink: &mut S) -> Result<Placement> {
        let root_dir = get_bit(key, 0) as usize;
        if self.trie.root().children[root_dir] == ChildRef::Empty {
            let Some(id) = self.allocate_bucket() else {
                self.evict_one(sink)?;
                return Ok(Placement::Retry);
            };
            self.trie.node_mut(TRIE_ROOT).children[root_dir] = ChildRef::Bucket(id);
            self.buckets[id as usize].add(key, doc_id)?;
            return Ok(Placement::Stored);
        }

        let (steps, bucket_id) = self.descend(key)?;
        let depth = steps[steps.len() - 1].depth;

        let bucket = &self.buckets[bucket_id as usize];
        let Some(first) = bucket.first_key() else {
            self.buckets[bucket_id as usize].add(key, doc_id)?;
            return Ok(Placement::Stored);
        };

        let prefix = lcp_with_next_bits(key, first);
        if depth == 0 || prefix.lcp > depth {
            if !bucket.is_full() {
                self.buckets[bucket_id as usize].add(key, doc_id)?;
                return Ok(Placement::Stored);
            }
            let repeated_key = bucket.lcp_bits() == KEY_BITS;
            if repeated_key || (self.can_allocate_bucket() && self.trie.can_allocate()) {
                self.split_bucket(bucket_id, steps[steps.len() - 1], sink)?;
            } else {
                self.evict_one(sink)?;
            }
            return Ok(Placement::Retry);
        }

        // A compressed edge skipped the bit where the key leaves this
        // bucket's prefix. Split that edge.
        let Some((key_bit, bucket_bit)) = prefix.next_bits else {
            return Err(TrieBulkError::Internal(format!(
                "key {:#010x} equals the first key of bucket {} but was not placed",
                key, bucket_id
            )));
        };
        let Some(level) = self.branch_level(&steps, prefix.lcp) else {
            return Err(TrieBulkError::KeyNotPlaced { key });
        };
        if !(self.can_allocate_bucket() && self.trie.can_allocate()) {
            self.evict_one(sink)?;
            return Ok(Placement::Retry);
        }

        let new_bucket = self.allocate_bucket().ok_or_else(exhausted)?;
        let middle = self.trie.allocate().ok_or_else(exhausted)?;
        let step = steps[level];
        let gap = (step.depth - prefix.lcp) as u16;

        let upper = *self.trie.node(step.node);
        *self.trie.node_mut(middle) = TrieNode {
            children: upper.children,
            edge_len: gap,
        };
        let node = self.trie.node_mut(step.node);
        node.edge_len -= gap;
        node.children[key_bit as usize] = ChildRef::Bucket(new_bucket);
        node.children[bucket_bit as usize] = ChildRef::Node(middle);
        self.buckets[new_bucket as usize].add(key, doc_id)?;

        trace!(
            key = format_args!("{:#010x}", key),
            node = step.node,
            branch_bit = prefix.lcp,
            "split trie edge"
        );
        Ok(Placement::Stored)
    }

    /// Follows the key's bits from the root to a bucket. The first step is
    /// always the root.
    fn descend(&self, key: Key) -> Result<(Vec<Step>, BucketId)> {
        let mut steps = vec![Step {
            node: TRIE_ROOT,
            depth: 0,
            dir: get_bit(key, 0) as usize,
        }];
        loop {
            let step = steps[steps.len() - 1];
            match self.trie.node(step.node).children[step.dir] {
                ChildRef::Bucket(id) => return Ok((steps, id)),
                ChildRef::Empty => return Err(TrieBulkError::KeyNotPlaced { key }),
                ChildRef::Node(child) => {
                    let depth = step.depth + self.trie.node(child).edge_len as u32;
                    if depth >= KEY_BITS || steps.len() > self.trie.max_nodes() {
                        return Err(TrieBulkError::Internal(format!(
                            "trie descent for key {:#010x} reached depth {}",
                            key, depth
                        )));
                    }
                    steps.push(Step {
                        node: child,
                        depth,
                        dir: get_bit(key, depth) as usize,
                    });
                }
            }
        }
    }

    /// Walks back up the descent to the node whose incoming edge spans bit
    /// `lcp`. `None` if the key would have to branch exactly at a node's
    /// own branch bit, or above the root's first child.
    fn branch_level(&self, steps: &[Step], lcp: u32) -> Option<usize> {
        for level in (1..steps.len()).rev() {
            let step = steps[level];
            let top = step.depth - self.trie.node(step.node).edge_len as u32;
            if lcp > top {
                return Some(level);
            }
            if lcp == top {
                return None;
            }
        }
        None
    }

    // =========================================================================
    // Splitting and eviction
    // =========================================================================

    /// Splits a full bucket on the bit after its common prefix and hangs
    /// both halves under a new trie node. A bucket of one repeated key
    /// cannot be split; all but one of its postings go to `sink` instead.
    fn split_bucket<S: KeySink>(&mut self, id: BucketId, parent: Step, sink: &mut S) -> Result<()> {
        let prev_lcp = self.buckets[id as usize].lcp_bits();
        if prev_lcp == KEY_BITS {
            let tail = self.buckets[id as usize].take_tail();
            self.send(&tail, sink)?;
            self.stats.equal_key_transfers += 1;
            debug!(bucket = id, moved = tail.len(), "flushed repeated key");
            return Ok(());
        }

        let new_id = self.allocate_bucket().ok_or_else(exhausted)?;
        let node = self.trie.allocate().ok_or_else(exhausted)?;

        let lower = self.buckets[id as usize].split_off_zeros(prev_lcp);
        let upper = &self.buckets[id as usize];
        let child = lower.lcp_bits().min(upper.lcp_bits());
        if lower.is_empty() || upper.is_empty() || child <= prev_lcp {
            return Err(TrieBulkError::BucketSplitInvariant {
                parent: prev_lcp,
                child,
            });
        }
        let lower_len = lower.len();
        self.buckets[new_id as usize] = lower;

        *self.trie.node_mut(node) = TrieNode {
            children: [ChildRef::Bucket(new_id), ChildRef::Bucket(id)],
            edge_len: (prev_lcp - parent.depth) as u16,
        };
        self.trie.node_mut(parent.node).children[parent.dir] = ChildRef::Node(node);

        self.stats.bucket_splits += 1;
        trace!(
            bucket = id,
            new_bucket = new_id,
            bit = prev_lcp,
            lower = lower_len,
            upper = self.buckets[id as usize].len(),
            "split bucket"
        );
        Ok(())
    }

    /// Flushes one bucket to `sink` to free a bucket slot and a trie node.
    ///
    /// The deepest internal node has two bucket children; the one with fewer
    /// postings (child 1 on a tie) is flushed and its sibling takes the
    /// node's place. Without internal nodes the root's children are used and
    /// the flushed child becomes empty.
    fn evict_one<S: KeySink>(&mut self, sink: &mut S) -> Result<()> {
        match self.trie.deepest_node() {
            Some(deepest) => {
                let children = self.trie.node(deepest.node).children;
                let (ChildRef::Bucket(b0), ChildRef::Bucket(b1)) = (children[0], children[1])
                else {
                    return Err(TrieBulkError::Internal(format!(
                        "deepest trie node {} has a non-bucket child",
                        deepest.node
                    )));
                };
                let (victim, survivor) = self.sparser(b0, b1);
                self.flush_bucket(victim, sink)?;
                self.release_bucket(victim);
                self.trie.node_mut(deepest.parent).children[deepest.dir] =
                    ChildRef::Bucket(survivor);
                self.trie.release(deepest.node);
                debug!(
                    bucket = victim,
                    depth = deepest.depth,
                    survivor,
                    "evicted bucket"
                );
            }
            None => {
                let children = self.trie.root().children;
                let dir = match (children[0], children[1]) {
                    (ChildRef::Bucket(b0), ChildRef::Bucket(b1)) => {
                        if self.sparser(b0, b1).0 == b0 {
                            0
                        } else {
                            1
                        }
                    }
                    (ChildRef::Bucket(_), _) => 0,
                    (_, ChildRef::Bucket(_)) => 1,
                    _ => {
                        return Err(TrieBulkError::BufferExhausted(
                            "no bucket available to evict".to_string(),
                        ))
                    }
                };
                let ChildRef::Bucket(victim) = children[dir] else {
                    return Err(TrieBulkError::Internal("root child changed".to_string()));
                };
                self.flush_bucket(victim, sink)?;
                self.release_bucket(victim);
                self.trie.node_mut(TRIE_ROOT).children[dir] = ChildRef::Empty;
                debug!(bucket = victim, depth = 0, "evicted root bucket");
            }
        }
        self.stats.evictions += 1;
        Ok(())
    }

    /// Orders a sibling pair as (flush, keep).
    fn sparser(&self, b0: BucketId, b1: BucketId) -> (BucketId, BucketId) {
        if self.buckets[b0 as usize].len() < self.buckets[b1 as usize].len() {
            (b0, b1)
        } else {
            (b1, b0)
        }
    }

    /// Sends a bucket's postings to `sink` as one batch and empties it.
    fn flush_bucket<S: KeySink>(&mut self, id: BucketId, sink: &mut S) -> Result<()> {
        let postings = self.buckets[id as usize].take_all();
        self.send(&postings, sink)
    }

    fn send<S: KeySink>(&mut self, postings: &[Posting], sink: &mut S) -> Result<()> {
        for posting in postings {
            sink.insert(posting.key, posting.doc_id)?;
        }
        sink.end_batch();
        self.stats.keys_transferred += postings.len() as u64;
        Ok(())
    }

    // =========================================================================
    // Bucket ids
    // =========================================================================

    fn can_allocate_bucket(&self) -> bool {
        !self.free_buckets.is_empty() || (self.next_bucket as usize) <= self.config.max_buckets
    }

    fn allocate_bucket(&mut self) -> Option<BucketId> {
        let id = match self.free_buckets.pop() {
            Some(id) => id,
            None if (self.next_bucket as usize) <= self.config.max_buckets => {
                self.next_bucket += 1;
                self.next_bucket - 1
            }
            None => return None,
        };
        self.buckets[id as usize].take_all();
        Some(id)
    }

    fn release_bucket(&mut self, id: BucketId) {
        self.buckets[id as usize].take_all();
        self.free_buckets.push(id);
    }
}

fn exhausted() -> TrieBulkError {
    TrieBulkError::BufferExhausted("bucket or trie node vanished after check".to_string())
}
