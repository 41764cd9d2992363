//! Path-compressed binary trie routing keys to buckets.

/// Identifier of a trie node. Node 0 is the root.
pub type TrieNodeId = u16;

/// Identifier of a bucket. Bucket ids start at 1.
pub type BucketId = u16;

/// The root node's id.
pub const TRIE_ROOT: TrieNodeId = 0;

/// A child slot of a trie node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildRef {
    #[default]
    Empty,
    Node(TrieNodeId),
    Bucket(BucketId),
}

impl ChildRef {
    /// Snapshot encoding: 0 empty, positive node, negative bucket.
    pub fn to_raw(self) -> i16 {
        match self {
            ChildRef::Empty => 0,
            ChildRef::Node(id) => id as i16,
            ChildRef::Bucket(id) => -(id as i16),
        }
    }

    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => ChildRef::Empty,
            r if r > 0 => ChildRef::Node(r as TrieNodeId),
            r => ChildRef::Bucket(r.unsigned_abs()),
        }
    }
}

/// An internal trie node.
///
/// The node branches on bit `depth`, where `depth` is the sum of
/// `edge_len` over the path from the root to this node. The root has
/// `edge_len == 0` and branches on bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrieNode {
    pub children: [ChildRef; 2],
    /// Bits consumed between the parent's branch bit and this node's.
    pub edge_len: u16,
}

/// The internal node chosen for eviction together with its parent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepestNode {
    pub parent: TrieNodeId,
    /// Which child of `parent` the node is.
    pub dir: usize,
    pub node: TrieNodeId,
    /// Cumulative edge length from the root.
    pub depth: u32,
}

/// Arena of trie nodes with id reuse.
#[derive(Debug, Clone)]
pub struct TopTrie {
    nodes: Vec<TrieNode>,
    /// Next never-used id.
    next: TrieNodeId,
    /// Released ids, kept as a stack and reused before `next`.
    free: Vec<TrieNodeId>,
}

impl TopTrie {
    /// Creates a trie with room for `max_nodes` nodes, the root included.
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: vec![TrieNode::default(); max_nodes.max(1)],
            next: 1,
            free: Vec::new(),
        }
    }

    #[inline]
    pub fn max_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn node(&self, id: TrieNodeId) -> &TrieNode {
        &self.nodes[id as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, id: TrieNodeId) -> &mut TrieNode {
        &mut self.nodes[id as usize]
    }

    #[inline]
    pub fn root(&self) -> &TrieNode {
        self.node(TRIE_ROOT)
    }

    /// Counter of never-used ids.
    pub fn next_id(&self) -> TrieNodeId {
        self.next
    }

    /// The id the next allocation would reuse, if any.
    pub fn pending_free(&self) -> Option<TrieNodeId> {
        self.free.last().copied()
    }

    /// Internal nodes in use, the root excluded.
    pub fn live_nodes(&self) -> usize {
        self.next as usize - 1 - self.free.len()
    }

    pub fn can_allocate(&self) -> bool {
        !self.free.is_empty() || (self.next as usize) < self.nodes.len()
    }

    /// Hands out a cleared node.
    pub fn allocate(&mut self) -> Option<TrieNodeId> {
        let id = match self.free.pop() {
            Some(id) => id,
            None if (self.next as usize) < self.nodes.len() => {
                self.next += 1;
                self.next - 1
            }
            None => return None,
        };
        self.nodes[id as usize] = TrieNode::default();
        Some(id)
    }

    pub fn release(&mut self, id: TrieNodeId) {
        self.nodes[id as usize] = TrieNode::default();
        self.free.push(id);
    }

    /// Drops every node. The root is left with two empty children.
    pub fn reset(&mut self) {
        self.nodes.iter_mut().for_each(|n| *n = TrieNode::default());
        self.next = 1;
        self.free.clear();
    }

    /// Finds the internal node with the greatest cumulative edge length.
    ///
    /// Nodes are visited in pre-order, child 0 first; on a tie the first
    /// visited wins. Returns `None` when the root has no internal children.
    pub fn deepest_node(&self) -> Option<DeepestNode> {
        let mut best: Option<DeepestNode> = None;
        // (parent, dir, parent depth)
        let mut stack = vec![(TRIE_ROOT, 1usize, 0u32), (TRIE_ROOT, 0usize, 0u32)];

        while let Some((parent, dir, parent_depth)) = stack.pop() {
            let ChildRef::Node(node) = self.node(parent).children[dir] else {
                continue;
            };
            let depth = parent_depth + self.node(node).edge_len as u32;
            if best.map_or(true, |b| depth > b.depth) {
                best = Some(DeepestNode {
                    parent,
                    dir,
                    node,
                    depth,
                });
            }
            stack.push((node, 1, depth));
            stack.push((node, 0, depth));
        }
        best
    }
}
