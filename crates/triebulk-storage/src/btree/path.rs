//! Root-to-leaf search path with per-level resume cursors.

use triebulk_common::{NodeId, Result, TrieBulkError};

/// The active path of a batch insertion.
///
/// `nodes[0]` is always the root. `cursors[i]` is the entry index where the
/// previous key's search stopped in `nodes[i]`; keys of one sorted batch
/// resume from there instead of rescanning the node. Every node on the path
/// is pinned in the node cache.
#[derive(Debug, Clone)]
pub struct SearchPath {
    nodes: Vec<NodeId>,
    cursors: Vec<usize>,
    max_height: usize,
}

impl SearchPath {
    /// Creates a path holding only the root.
    pub fn new(max_height: usize) -> Self {
        let mut nodes = Vec::with_capacity(max_height);
        let mut cursors = Vec::with_capacity(max_height);
        nodes.push(NodeId::ROOT);
        cursors.push(0);
        Self {
            nodes,
            cursors,
            max_height,
        }
    }

    /// Nodes from the root to the tail. These are the pinned nodes.
    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Index of the tail (0 = root only).
    #[inline]
    pub fn level(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Number of nodes on the path.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root never leaves the path.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn tail(&self) -> NodeId {
        self.nodes[self.level()]
    }

    #[inline]
    pub fn node_at(&self, level: usize) -> NodeId {
        self.nodes[level]
    }

    #[inline]
    pub fn cursor(&self, level: usize) -> usize {
        self.cursors[level]
    }

    #[inline]
    pub fn set_cursor(&mut self, level: usize, cursor: usize) {
        self.cursors[level] = cursor;
    }

    /// Extends the path by one level with a zeroed cursor.
    pub fn push(&mut self, node: NodeId) -> Result<()> {
        if self.nodes.len() >= self.max_height {
            return Err(TrieBulkError::TreeTooTall {
                max: self.max_height,
            });
        }
        self.nodes.push(node);
        self.cursors.push(0);
        Ok(())
    }

    /// Drops the tail and its cursor. The root is never popped.
    pub fn pop(&mut self) -> Option<NodeId> {
        if self.nodes.len() <= 1 {
            return None;
        }
        self.cursors.pop();
        self.nodes.pop()
    }

    /// Replaces the node at `level`.
    pub fn replace(&mut self, level: usize, node: NodeId) {
        self.nodes[level] = node;
    }

    /// Makes room for a new level right below the root after a root split.
    /// All cursors are zeroed.
    pub fn insert_below_root(&mut self, node: NodeId) -> Result<()> {
        if self.nodes.len() >= self.max_height {
            return Err(TrieBulkError::TreeTooTall {
                max: self.max_height,
            });
        }
        self.nodes.insert(1, node);
        self.cursors.push(0);
        self.cursors.iter_mut().for_each(|c| *c = 0);
        Ok(())
    }

    /// Truncates the path to the root and zeroes its cursor.
    pub fn reset(&mut self) {
        self.nodes.truncate(1);
        self.cursors.truncate(1);
        self.cursors[0] = 0;
    }
}
