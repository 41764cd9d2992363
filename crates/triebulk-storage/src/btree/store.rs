//! Node store: the node cache backed by the record file.

use super::node::BTreeNode;
use crate::disk::{NodeFile, NodeFileConfig};
use std::path::Path;
use tracing::{debug, info};
use triebulk_cache::{CacheStats, EvictedNode, NodeCache, NodeCacheConfig};
use triebulk_common::{IndexConfig, NodeId, NodeType, Result, TrieBulkError};

/// I/O counters of the node store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records read from disk.
    pub reads: u64,
    /// Records written, appends included.
    pub writes: u64,
    /// Nodes created.
    pub allocations: u64,
}

/// Fixed-size node cache over a flat file of fixed-size records.
///
/// Node `i` lives at byte `i * record_size`. New nodes are appended to the
/// file as soon as they are allocated so ids and offsets never drift apart.
/// Modified nodes are written back when evicted or on [`NodeStore::finalize`].
pub struct NodeStore {
    cache: NodeCache<BTreeNode>,
    file: NodeFile,
    /// Cells per node record.
    entries: usize,
    /// Nodes that exist, on disk or pending write-back.
    node_count: u32,
    stats: StoreStats,
}

impl NodeStore {
    /// Opens the store, creating an empty root if the index is new.
    ///
    /// Existing indexes are preloaded entirely when they fit in the cache;
    /// otherwise only the root is loaded and the rest is read on demand.
    pub fn open(config: &IndexConfig, index_path: &Path, size_path: &Path) -> Result<Self> {
        config.validate()?;
        let entries = config.node_entries;
        let file = NodeFile::open(NodeFileConfig {
            index_path: index_path.to_path_buf(),
            size_path: size_path.to_path_buf(),
            record_size: BTreeNode::record_size(entries),
            fsync_enabled: config.fsync_enabled,
        })?;

        let node_count = file.read_node_count()?;
        if node_count > file.num_records() {
            return Err(TrieBulkError::TreeCorrupted(format!(
                "size file lists {} nodes but {} holds {}",
                node_count,
                file.path().display(),
                file.num_records()
            )));
        }
        if node_count < file.num_records() {
            // Records past the persisted count come from a run that never
            // finalized; drop them so new ids line up with the file again.
            debug!(
                persisted = node_count,
                on_disk = file.num_records(),
                "truncating unfinalized records"
            );
            file.truncate(node_count)?;
        }

        let cache_config = if config.cache_nodes == 0 {
            NodeCacheConfig::auto_sized(BTreeNode::record_size(entries))
        } else {
            NodeCacheConfig {
                num_slots: config.cache_nodes,
            }
        };

        let mut store = Self {
            cache: NodeCache::new(cache_config),
            file,
            entries,
            node_count,
            stats: StoreStats::default(),
        };

        if node_count == 0 {
            let root = BTreeNode::new(NodeId::ROOT, NodeType::Root, entries);
            store.file.append_record(NodeId::ROOT, &root.to_bytes())?;
            store.stats.writes += 1;
            store.stats.allocations += 1;
            store.cache.install_root(root, false);
            store.node_count = 1;
        } else {
            let root = store.read_node(NodeId::ROOT)?;
            store.cache.install_root(root, false);
            if (node_count as usize) < store.cache.num_slots() {
                for id in 1..node_count {
                    let node = store.read_node(NodeId(id))?;
                    store.install(node, false, &[])?;
                }
            }
        }

        info!(
            nodes = store.node_count,
            resident = store.cache.resident_count(),
            cache_slots = store.cache.num_slots(),
            "node store opened"
        );
        Ok(store)
    }

    /// Cells per node record.
    pub fn entries_per_node(&self) -> usize {
        self.entries
    }

    /// Number of nodes in the index.
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Number of nodes currently resident.
    pub fn resident_count(&self) -> usize {
        self.cache.resident_count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Returns a node, loading it if needed. `pinned` nodes are never evicted.
    pub fn get(&mut self, node_id: NodeId, pinned: &[NodeId]) -> Result<&BTreeNode> {
        self.ensure_resident(node_id, pinned)?;
        self.cache
            .get(node_id)
            .ok_or(TrieBulkError::NodeNotFound { node_id: node_id.0 })
    }

    /// Returns a node for modification, loading it if needed.
    pub fn get_mut(&mut self, node_id: NodeId, pinned: &[NodeId]) -> Result<&mut BTreeNode> {
        self.ensure_resident(node_id, pinned)?;
        self.cache
            .get_mut(node_id)
            .ok_or(TrieBulkError::NodeNotFound { node_id: node_id.0 })
    }

    /// Creates a node with the next id, writes it to the end of the file and
    /// caches it.
    pub fn allocate(&mut self, node_type: NodeType, pinned: &[NodeId]) -> Result<NodeId> {
        let node_id = NodeId(self.node_count);
        let node = BTreeNode::new(node_id, node_type, self.entries);
        self.file.append_record(node_id, &node.to_bytes())?;
        self.stats.writes += 1;
        self.stats.allocations += 1;
        self.node_count += 1;
        self.install(node, false, pinned)?;
        Ok(node_id)
    }

    /// Writes back every dirty node and persists the node count.
    pub fn finalize(&mut self) -> Result<()> {
        let file = &self.file;
        let flushed = self
            .cache
            .flush_all(|node| file.write_record(node.id(), &node.to_bytes()))?;
        self.stats.writes += flushed as u64;
        self.file.write_node_count(self.node_count)?;
        self.file.flush()?;
        info!(nodes = self.node_count, flushed, "node store finalized");
        Ok(())
    }

    fn ensure_resident(&mut self, node_id: NodeId, pinned: &[NodeId]) -> Result<()> {
        if self.cache.contains(node_id) {
            return Ok(());
        }
        if node_id.0 >= self.node_count {
            return Err(TrieBulkError::NodeNotFound { node_id: node_id.0 });
        }
        let node = self.read_node(node_id)?;
        self.install(node, false, pinned)
    }

    fn read_node(&mut self, node_id: NodeId) -> Result<BTreeNode> {
        let data = self.file.read_record(node_id)?;
        self.stats.reads += 1;
        let node = BTreeNode::from_bytes(&data, self.entries)?;
        if node.id() != node_id {
            return Err(TrieBulkError::TreeCorrupted(format!(
                "record {} holds {}",
                node_id.0,
                node.id()
            )));
        }
        Ok(node)
    }

    fn install(&mut self, node: BTreeNode, dirty: bool, pinned: &[NodeId]) -> Result<()> {
        if let Some(EvictedNode { node: victim }) = self.cache.install(node, dirty, pinned)? {
            self.file.write_record(victim.id(), &victim.to_bytes())?;
            self.stats.writes += 1;
        }
        Ok(())
    }
}
