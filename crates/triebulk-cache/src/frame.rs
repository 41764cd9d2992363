//! Cache slot management.

use triebulk_common::NodeId;

/// Unique identifier for a slot in the node cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl SlotId {
    /// Slot permanently holding the root.
    pub const ROOT: SlotId = SlotId(0);

    /// Returns the slot as an array index.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// A value that can live in the node cache.
pub trait CachedNode {
    /// Identifier the cache indexes the value by.
    fn node_id(&self) -> NodeId;
}

/// A slot in the node cache holding at most one node.
pub struct CacheSlot<N> {
    /// Slot identifier.
    slot_id: SlotId,
    /// The resident node, if any.
    node: Option<N>,
    /// Whether the resident node differs from its on-disk record.
    dirty: bool,
}

impl<N: CachedNode> CacheSlot<N> {
    /// Creates an empty slot.
    pub fn new(slot_id: SlotId) -> Self {
        Self {
            slot_id,
            node: None,
            dirty: false,
        }
    }

    /// Returns the slot ID.
    #[inline]
    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Returns the id of the resident node.
    #[inline]
    pub fn node_id(&self) -> Option<NodeId> {
        self.node.as_ref().map(|n| n.node_id())
    }

    /// Returns true if a node is resident.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.node.is_some()
    }

    /// Returns true if the resident node needs writing back.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Shared access to the resident node.
    #[inline]
    pub fn node(&self) -> Option<&N> {
        self.node.as_ref()
    }

    /// Mutable access to the resident node. Marks the slot dirty.
    #[inline]
    pub fn node_mut(&mut self) -> Option<&mut N> {
        if self.node.is_some() {
            self.dirty = true;
        }
        self.node.as_mut()
    }

    /// Installs a node, returning the previous occupant and its dirty flag.
    pub fn replace(&mut self, node: N, dirty: bool) -> Option<(N, bool)> {
        let was_dirty = self.dirty;
        self.dirty = dirty;
        self.node.replace(node).map(|old| (old, was_dirty))
    }
}
