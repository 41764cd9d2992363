//! Node cache manager.

use crate::frame::{CacheSlot, CachedNode, SlotId};
use crate::replacer::{CircularReplacer, Replacer};
use std::collections::HashMap;
use sysinfo::System;
use tracing::trace;
use triebulk_common::{NodeId, Result, TrieBulkError};

/// A dirty node that was evicted from the cache.
/// Caller must write this to disk to prevent data loss.
#[derive(Debug)]
pub struct EvictedNode<N> {
    pub node: N,
}

/// Configuration for the node cache.
#[derive(Debug, Clone)]
pub struct NodeCacheConfig {
    /// Number of slots, slot 0 included.
    pub num_slots: usize,
}

impl Default for NodeCacheConfig {
    fn default() -> Self {
        Self { num_slots: 10_000 }
    }
}

impl NodeCacheConfig {
    /// Sizes the cache to 25% of available system RAM.
    ///
    /// At least 1,000 slots are used even on low-memory systems.
    pub fn auto_sized(record_size: usize) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_slots = (target_bytes / record_size.max(1)).max(1_000);

        Self { num_slots }
    }
}

/// Counters describing cache behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a resident slot.
    pub hits: u64,
    /// Lookups that found no resident slot.
    pub misses: u64,
    /// Occupied slots reused for another node.
    pub evictions: u64,
    /// Evictions that handed a dirty node back for writing.
    pub dirty_writebacks: u64,
}

/// Fixed-capacity node cache.
///
/// Slot 0 holds the root and is never offered for eviction. Other slots are
/// reused through a circular scan that skips every node the caller reports
/// as pinned. The cache never touches disk itself: dirty victims are handed
/// back as [`EvictedNode`] and flushing goes through a callback.
pub struct NodeCache<N> {
    /// Configuration.
    config: NodeCacheConfig,
    /// Array of slots.
    slots: Vec<CacheSlot<N>>,
    /// Node ID to slot mapping.
    node_table: HashMap<NodeId, SlotId>,
    /// Slot replacement policy.
    replacer: CircularReplacer,
    /// Counters.
    stats: CacheStats,
}

impl<N: CachedNode> NodeCache<N> {
    /// Creates a new node cache.
    pub fn new(config: NodeCacheConfig) -> Self {
        let num_slots = config.num_slots.max(2);
        let slots = (0..num_slots)
            .map(|i| CacheSlot::new(SlotId(i as u32)))
            .collect();

        Self {
            config: NodeCacheConfig { num_slots },
            slots,
            node_table: HashMap::with_capacity(num_slots),
            replacer: CircularReplacer::new(num_slots, 1),
            stats: CacheStats::default(),
        }
    }

    /// Returns the number of slots in the cache.
    pub fn num_slots(&self) -> usize {
        self.config.num_slots
    }

    /// Returns the number of resident nodes.
    pub fn resident_count(&self) -> usize {
        self.node_table.len()
    }

    /// Checks if a node is resident.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.node_table.contains_key(&node_id)
    }

    /// Returns the slot holding a node.
    pub fn slot_of(&self, node_id: NodeId) -> Option<SlotId> {
        self.node_table.get(&node_id).copied()
    }

    /// Returns cache counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Looks up a resident node.
    #[inline]
    pub fn get(&mut self, node_id: NodeId) -> Option<&N> {
        match self.node_table.get(&node_id) {
            Some(slot) => {
                self.stats.hits += 1;
                self.slots[slot.index()].node()
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Looks up a resident node for modification. The slot becomes dirty.
    #[inline]
    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut N> {
        match self.node_table.get(&node_id) {
            Some(slot) => {
                self.stats.hits += 1;
                self.slots[slot.index()].node_mut()
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Places the root in slot 0, replacing any previous root.
    pub fn install_root(&mut self, node: N, dirty: bool) {
        let node_id = node.node_id();
        if let Some((old, _)) = self.slots[SlotId::ROOT.index()].replace(node, dirty) {
            self.node_table.remove(&old.node_id());
        }
        self.node_table.insert(node_id, SlotId::ROOT);
    }

    /// Installs a node in a free or evictable slot.
    ///
    /// `pinned` lists the nodes that must stay resident (the active search
    /// path). Returns any dirty node that was evicted to make room; the
    /// caller must write it to disk. Fails with `CacheFull` if every slot
    /// holds a pinned node.
    pub fn install(
        &mut self,
        node: N,
        dirty: bool,
        pinned: &[NodeId],
    ) -> Result<Option<EvictedNode<N>>> {
        let node_id = node.node_id();
        if node_id == NodeId::ROOT {
            self.install_root(node, dirty);
            return Ok(None);
        }
        if self.node_table.contains_key(&node_id) {
            return Err(TrieBulkError::Internal(format!(
                "{} is already resident",
                node_id
            )));
        }

        let slots = &self.slots;
        let victim = self.replacer.victim(|slot| match slots[slot.index()].node_id() {
            None => true,
            Some(resident) => !pinned.contains(&resident),
        });
        let victim = victim.ok_or(TrieBulkError::CacheFull)?;

        let evicted = match self.slots[victim.index()].replace(node, dirty) {
            Some((old, old_dirty)) => {
                self.node_table.remove(&old.node_id());
                self.stats.evictions += 1;
                trace!(slot = %victim, evicted = %old.node_id(), dirty = old_dirty, "evicting node");
                if old_dirty {
                    self.stats.dirty_writebacks += 1;
                    Some(EvictedNode { node: old })
                } else {
                    None
                }
            }
            None => None,
        };

        self.node_table.insert(node_id, victim);
        self.replacer.record_fill(victim);

        Ok(evicted)
    }

    /// Passes every dirty resident node to `flush_fn` and marks it clean.
    ///
    /// Returns the number of nodes flushed.
    pub fn flush_all<F>(&mut self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(&N) -> Result<()>,
    {
        let mut flushed = 0;
        for slot in self.slots.iter_mut() {
            if !slot.is_dirty() {
                continue;
            }
            if let Some(node) = slot.node() {
                flush_fn(node)?;
                flushed += 1;
            }
            slot.set_dirty(false);
        }
        Ok(flushed)
    }
}
