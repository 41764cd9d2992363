//! Batch insertion engine over the node store.

use super::node::{BTreeNode, Entry, KeyGroup};
use super::path::SearchPath;
use super::store::{NodeStore, StoreStats};
use crate::buffer::KeySink;
use std::path::Path;
use tracing::{debug, info};
use triebulk_cache::CacheStats;
use triebulk_common::{
    DocId, IndexConfig, Key, NodeId, NodeType, Result, TrieBulkError, SENTINEL_KEY,
};

/// Counters describing B-tree mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// (key, doc) postings inserted.
    pub keys_inserted: u64,
    pub leaf_splits: u64,
    pub internal_splits: u64,
    pub root_splits: u64,
    /// Levels from root to leaf, both included.
    pub height: usize,
}

/// Disk-resident B-tree with sorted batch insertion.
///
/// Consecutive keys of one ascending batch reuse the [`SearchPath`] left by
/// the previous key: the tail leaf is kept while the key fits under its
/// `max_key`, and routing nodes resume scanning from their cursor. Leaves
/// split by moving their lower half into a new node, so the old node keeps
/// its `max_key` and only one separator has to be inserted into the parent.
pub struct BTreeIndex {
    pub(super) store: NodeStore,
    pub(super) path: SearchPath,
    pub(super) config: IndexConfig,
    stats: IndexStats,
}

impl BTreeIndex {
    /// Opens or creates the index stored at `index_path`.
    pub fn open(config: &IndexConfig, index_path: &Path, size_path: &Path) -> Result<Self> {
        let store = NodeStore::open(config, index_path, size_path)?;
        let mut index = Self {
            store,
            path: SearchPath::new(config.max_tree_height),
            config: config.clone(),
            stats: IndexStats::default(),
        };
        index.stats.height = index.measure_height()?;
        info!(
            nodes = index.store.node_count(),
            height = index.stats.height,
            "b-tree opened"
        );
        Ok(index)
    }

    /// Inserts one posting, continuing from the current search path.
    pub fn insert(&mut self, key: Key, doc_id: DocId) -> Result<()> {
        self.find_leaf_to_insert(key)?;

        let level = self.path.level();
        let start = self.path.cursor(level);
        let leaf = self.path.tail();
        let pos = self
            .store
            .get_mut(leaf, self.path.nodes())?
            .insert_posting(key, doc_id, start)?;
        self.path.set_cursor(level, pos);
        self.stats.keys_inserted += 1;
        Ok(())
    }

    /// Forgets the current path. Required before a batch that is not ordered
    /// after the previous one.
    pub fn reset_path(&mut self) {
        self.path.reset();
    }

    /// Writes every modified node and the node count to disk.
    pub fn finalize(&mut self) -> Result<()> {
        self.reset_path();
        self.store.finalize()?;
        info!(
            nodes = self.store.node_count(),
            height = self.stats.height,
            keys_inserted = self.stats.keys_inserted,
            "b-tree finalized"
        );
        Ok(())
    }

    /// Returns a copy of a node.
    pub fn read_node(&mut self, node_id: NodeId) -> Result<BTreeNode> {
        Ok(self.store.get(node_id, self.path.nodes())?.clone())
    }

    pub fn node_count(&self) -> u32 {
        self.store.node_count()
    }

    pub fn height(&self) -> usize {
        self.stats.height
    }

    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.cache_stats()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Height of the leftmost descent. 1 for an empty index.
    fn measure_height(&mut self) -> Result<usize> {
        let mut height = 1;
        let mut node_id = NodeId::ROOT;
        loop {
            let node = self.store.get(node_id, &[NodeId::ROOT])?;
            if node.is_leaf() || node.keys_count() == 0 {
                return Ok(height);
            }
            node_id = NodeId(node.entry(0).link);
            height += 1;
            if height > self.config.max_tree_height {
                return Err(TrieBulkError::TreeTooTall {
                    max: self.config.max_tree_height,
                });
            }
        }
    }

    // =========================================================================
    // Locating the leaf
    // =========================================================================

    /// Leaves the path ending at a leaf that covers `key` and has room for it,
    /// splitting on the way as needed.
    fn find_leaf_to_insert(&mut self, key: Key) -> Result<()> {
        // Each round either finishes, descends, or splits once.
        let max_rounds = 4 * self.config.max_tree_height + 8;
        for _ in 0..max_rounds {
            let tail = self.path.tail();
            let (node_type, max_key, keys_count, has_room) = {
                let node = self.store.get(tail, self.path.nodes())?;
                (
                    node.node_type(),
                    node.max_key(),
                    node.keys_count(),
                    node.has_room_for_key(),
                )
            };

            match node_type {
                NodeType::Leaf if key <= max_key => {
                    if has_room {
                        return Ok(());
                    }
                    self.split_leaf(key)?;
                }
                NodeType::Leaf => {
                    self.search_up(key)?;
                    self.search_down(key)?;
                }
                NodeType::Root if keys_count == 0 => self.create_first_leaf()?,
                NodeType::Root => self.search_down(key)?,
                NodeType::Internal => {
                    return Err(TrieBulkError::TreeCorrupted(format!(
                        "path ends at {} which is neither root nor leaf",
                        tail
                    )));
                }
            }
        }
        Err(TrieBulkError::Internal(format!(
            "no leaf found for key {} after {} rounds",
            key, max_rounds
        )))
    }

    /// Pops levels until the tail covers `key` or only the root is left.
    fn search_up(&mut self, key: Key) -> Result<()> {
        while self.path.level() > 0 {
            let max_key = self.store.get(self.path.tail(), self.path.nodes())?.max_key();
            if key <= max_key {
                break;
            }
            self.path.pop();
        }
        Ok(())
    }

    /// Follows routing entries from the tail down to a leaf.
    fn search_down(&mut self, key: Key) -> Result<()> {
        loop {
            let level = self.path.level();
            let tail = self.path.tail();
            let start = self.path.cursor(level);
            let route = {
                let node = self.store.get(tail, self.path.nodes())?;
                if node.is_leaf() {
                    return Ok(());
                }
                node.route(key, start)
            };

            let (index, child) = route.ok_or_else(|| {
                TrieBulkError::TreeCorrupted(format!(
                    "key {} has no route in {} from entry {}",
                    key, tail, start
                ))
            })?;
            self.path.set_cursor(level, index);
            self.store.get(child, self.path.nodes())?;
            self.path.push(child)?;
        }
    }

    /// Hangs the first leaf under an empty root. Both carry the sentinel.
    fn create_first_leaf(&mut self) -> Result<()> {
        let leaf = self.store.allocate(NodeType::Leaf, self.path.nodes())?;
        self.store.get_mut(leaf, self.path.nodes())?.header.max_key = SENTINEL_KEY;

        let root = self.store.get_mut(NodeId::ROOT, self.path.nodes())?;
        root.header.max_key = SENTINEL_KEY;
        root.put_routing(0, SENTINEL_KEY, leaf);

        self.path.push(leaf)?;
        self.stats.height = 2;
        debug!(leaf = %leaf, "created first leaf");
        Ok(())
    }

    // =========================================================================
    // Splits
    // =========================================================================

    /// Splits the tail leaf and registers the new leaf with its parent.
    fn split_leaf(&mut self, key: Key) -> Result<()> {
        let level = self.path.level();
        if level == 0 {
            return Err(TrieBulkError::TreeCorrupted(
                "leaf split requested on the root".to_string(),
            ));
        }
        let old_id = self.path.tail();
        let groups = self.store.get(old_id, self.path.nodes())?.leaf_groups()?;
        let (lower, upper, new_max) = split_key_groups(old_id, groups)?;

        let new_id = self.store.allocate(NodeType::Leaf, self.path.nodes())?;
        {
            let new_leaf = self.store.get_mut(new_id, self.path.nodes())?;
            new_leaf.header.max_key = new_max;
            new_leaf.rebuild_leaf(&lower)?;
        }
        self.store
            .get_mut(old_id, self.path.nodes())?
            .rebuild_leaf(&upper)?;

        self.stats.leaf_splits += 1;
        debug!(
            old = %old_id,
            new = %new_id,
            separator = new_max,
            moved = lower.len(),
            kept = upper.len(),
            "split leaf"
        );

        self.path.set_cursor(level, 0);
        if key <= new_max {
            self.path.replace(level, new_id);
        }
        self.insert_separator(level - 1, old_id, new_max, new_id)
    }

    /// Inserts (separator, child) into the path node at `level`, directly
    /// before the entry for `sibling`, the node `child` was split from.
    /// Splits ancestors upward while they are full.
    fn insert_separator(
        &mut self,
        level: usize,
        sibling: NodeId,
        separator: Key,
        child: NodeId,
    ) -> Result<()> {
        let mut level = level;
        let mut sibling = sibling;
        let mut separator = separator;
        let mut child = child;
        loop {
            let parent_id = self.path.node_at(level);
            let (full, is_root) = {
                let parent = self.store.get(parent_id, self.path.nodes())?;
                (
                    parent.keys_count() >= parent.capacity(),
                    parent.node_type() == NodeType::Root,
                )
            };

            if !full {
                self.store
                    .get_mut(parent_id, self.path.nodes())?
                    .insert_routing_before(sibling, separator, child)?;
                self.path.set_cursor(level, 0);
                return Ok(());
            }
            if is_root {
                return self.split_root(sibling, separator, child);
            }
            if level == 0 {
                return Err(TrieBulkError::TreeCorrupted(format!(
                    "{} sits at the root level but is not the root",
                    parent_id
                )));
            }

            let (new_id, new_max) = self.split_internal(level, sibling, separator, child)?;
            sibling = parent_id;
            separator = new_max;
            child = new_id;
            level -= 1;
        }
    }

    /// Splits the internal node at `level` with the pending entry placed
    /// before `sibling`. The lower half moves into a new node. The path
    /// keeps whichever half holds its child. Returns the new node and its
    /// max key for the parent.
    fn split_internal(
        &mut self,
        level: usize,
        sibling: NodeId,
        separator: Key,
        child: NodeId,
    ) -> Result<(NodeId, Key)> {
        let old_id = self.path.node_at(level);
        let routing = {
            let node = self.store.get(old_id, self.path.nodes())?;
            routing_with_entry(node, sibling, separator, child)?
        };
        let half = routing.len() / 2;
        let new_max = routing[half - 1].value;

        let new_id = self.store.allocate(NodeType::Internal, self.path.nodes())?;
        {
            let node = self.store.get_mut(new_id, self.path.nodes())?;
            node.header.max_key = new_max;
            node.set_routing(&routing[..half]);
        }
        self.store
            .get_mut(old_id, self.path.nodes())?
            .set_routing(&routing[half..]);

        let below = self.path.node_at(level + 1);
        if routing[..half].iter().any(|e| e.link == below.0) {
            self.path.replace(level, new_id);
        }
        self.path.set_cursor(level, 0);

        self.stats.internal_splits += 1;
        debug!(old = %old_id, new = %new_id, separator = new_max, "split internal node");
        Ok((new_id, new_max))
    }

    /// Moves the root's entries, plus the pending entry placed before
    /// `sibling`, into two new children and points the root at them. The
    /// tree grows by one level.
    fn split_root(&mut self, sibling: NodeId, separator: Key, child: NodeId) -> Result<()> {
        if self.path.len() >= self.config.max_tree_height {
            return Err(TrieBulkError::TreeTooTall {
                max: self.config.max_tree_height,
            });
        }

        let (routing, root_max) = {
            let root = self.store.get(NodeId::ROOT, self.path.nodes())?;
            (
                routing_with_entry(root, sibling, separator, child)?,
                root.max_key(),
            )
        };
        let half = routing.len() / 2;
        let left_max = routing[half - 1].value;

        let mut pinned = self.path.nodes().to_vec();
        let left = self.store.allocate(NodeType::Internal, &pinned)?;
        pinned.push(left);
        let right = self.store.allocate(NodeType::Internal, &pinned)?;
        pinned.push(right);

        {
            let node = self.store.get_mut(left, &pinned)?;
            node.header.max_key = left_max;
            node.set_routing(&routing[..half]);
        }
        {
            let node = self.store.get_mut(right, &pinned)?;
            node.header.max_key = root_max;
            node.set_routing(&routing[half..]);
        }
        self.store.get_mut(NodeId::ROOT, &pinned)?.set_routing(&[
            Entry::new(left_max, left.0),
            Entry::new(root_max, right.0),
        ]);

        let below = self.path.node_at(1);
        let target = if routing[..half].iter().any(|e| e.link == below.0) {
            left
        } else {
            right
        };
        self.path.insert_below_root(target)?;

        self.stats.root_splits += 1;
        self.stats.height += 1;
        debug!(
            left = %left,
            right = %right,
            height = self.stats.height,
            "split root"
        );
        Ok(())
    }
}

impl KeySink for BTreeIndex {
    fn insert(&mut self, key: Key, doc_id: DocId) -> Result<()> {
        BTreeIndex::insert(self, key, doc_id)
    }

    fn end_batch(&mut self) {
        self.reset_path();
    }
}

/// Routing entries of a full node with (separator, child) placed directly
/// before the entry for `sibling`.
fn routing_with_entry(
    node: &BTreeNode,
    sibling: NodeId,
    separator: Key,
    child: NodeId,
) -> Result<Vec<Entry>> {
    let mut routing = node.live_entries().to_vec();
    let pos = node.child_position(sibling).ok_or_else(|| {
        TrieBulkError::TreeCorrupted(format!("{} has no entry for {}", node.id(), sibling))
    })?;
    routing.insert(pos, Entry::new(separator, child.0));
    Ok(routing)
}

/// Divides a full leaf's groups. The lower part moves to the new leaf and
/// its largest key becomes the separator. A single key is split along its
/// document chain instead.
fn split_key_groups(
    leaf: NodeId,
    mut groups: Vec<KeyGroup>,
) -> Result<(Vec<KeyGroup>, Vec<KeyGroup>, Key)> {
    if groups.len() > 1 {
        let half = groups.len() / 2;
        let upper = groups.split_off(half);
        let new_max = groups[half - 1].0;
        return Ok((groups, upper, new_max));
    }

    let (key, mut docs) = groups.pop().ok_or_else(|| {
        TrieBulkError::TreeCorrupted(format!("{} is full but holds no keys", leaf))
    })?;
    if docs.len() < 2 {
        return Err(TrieBulkError::TreeCorrupted(format!(
            "{} is full but key {} has {} documents",
            leaf,
            key,
            docs.len()
        )));
    }
    let upper = docs.split_off(docs.len() / 2);
    Ok((vec![(key, docs)], vec![(key, upper)], key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn small_config() -> IndexConfig {
        IndexConfig {
            node_entries: 10,
            max_tree_height: 6,
            cache_nodes: 64,
            fsync_enabled: false,
        }
    }

    fn create_test_index(config: &IndexConfig) -> (BTreeIndex, TempDir) {
        let dir = tempdir().unwrap();
        let index = BTreeIndex::open(config, &dir.path().join("idx"), &dir.path().join("idx_size"))
            .unwrap();
        (index, dir)
    }

    fn keys_of(node: &BTreeNode) -> Vec<Key> {
        node.live_entries().iter().map(|e| e.value).collect()
    }

    #[test]
    fn test_open_empty() {
        let (mut index, _dir) = create_test_index(&small_config());
        assert_eq!(index.node_count(), 1);
        assert_eq!(index.height(), 1);
        let root = index.read_node(NodeId::ROOT).unwrap();
        assert_eq!(root.keys_count(), 0);
    }

    #[test]
    fn test_first_insert_creates_leaf() {
        let (mut index, _dir) = create_test_index(&small_config());
        index.insert(7, 1).unwrap();

        assert_eq!(index.height(), 2);
        assert_eq!(index.path().nodes(), &[NodeId::ROOT, NodeId(1)]);
        let root = index.read_node(NodeId::ROOT).unwrap();
        assert_eq!(root.max_key(), SENTINEL_KEY);
        assert_eq!(root.live_entries(), &[Entry::new(SENTINEL_KEY, 1)]);
        let leaf = index.read_node(NodeId(1)).unwrap();
        assert_eq!(leaf.max_key(), SENTINEL_KEY);
        assert_eq!(leaf.leaf_groups().unwrap(), vec![(7, vec![1])]);
    }

    #[test]
    fn test_leaf_split_by_count() {
        let (mut index, _dir) = create_test_index(&small_config());
        for key in [10, 20, 30, 40, 50] {
            index.insert(key, 1).unwrap();
        }

        assert_eq!(index.stats().leaf_splits, 1);
        let root = index.read_node(NodeId::ROOT).unwrap();
        assert_eq!(
            root.live_entries(),
            &[Entry::new(20, 2), Entry::new(SENTINEL_KEY, 1)]
        );
        let new_leaf = index.read_node(NodeId(2)).unwrap();
        assert_eq!(keys_of(&new_leaf), vec![10, 20]);
        assert_eq!(new_leaf.max_key(), 20);
        let old_leaf = index.read_node(NodeId(1)).unwrap();
        assert_eq!(keys_of(&old_leaf), vec![30, 40, 50]);
        assert_eq!(old_leaf.max_key(), SENTINEL_KEY);
    }

    #[test]
    fn test_path_follows_key_after_split() {
        let (mut index, _dir) = create_test_index(&small_config());
        for key in [10, 20, 30, 40] {
            index.insert(key, 1).unwrap();
        }
        index.reset_path();
        // Lands in the lower half after the split.
        index.insert(15, 2).unwrap();
        assert_eq!(index.path().tail(), NodeId(2));
        assert_eq!(keys_of(&index.read_node(NodeId(2)).unwrap()), vec![10, 15, 20]);
    }

    #[test]
    fn test_duplicate_key_chain_split() {
        let (mut index, _dir) = create_test_index(&small_config());
        for doc in 0..12 {
            index.insert(99, doc).unwrap();
        }
        assert!(index.stats().leaf_splits >= 1);

        let mut docs = index.lookup(99).unwrap();
        docs.sort_unstable();
        assert_eq!(docs, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_equal_separators_keep_split_order() {
        let (mut index, _dir) = create_test_index(&small_config());
        // Seven postings of one key split its chain: leaf 2 takes the lower
        // half and both leaves end at 694.
        for doc in 0..7 {
            index.insert(694, doc).unwrap();
        }
        index.reset_path();
        index.insert(660, 100).unwrap();
        index.reset_path();
        // Leaf 1 splits again with 694 as its lower half.
        for (key, doc) in [(793, 200), (837, 201), (900, 202)] {
            index.insert(key, doc).unwrap();
        }

        assert_eq!(index.stats().leaf_splits, 2);
        let root = index.read_node(NodeId::ROOT).unwrap();
        assert_eq!(
            root.live_entries(),
            &[
                Entry::new(694, 2),
                Entry::new(694, 3),
                Entry::new(SENTINEL_KEY, 1)
            ]
        );
        assert_eq!(index.lookup(660).unwrap(), vec![100]);
        let mut docs = index.lookup(694).unwrap();
        docs.sort_unstable();
        assert_eq!(docs, (0..7).collect::<Vec<_>>());
        assert_eq!(index.lookup(900).unwrap(), vec![202]);

        // A later batch still routes 660 into leaf 2, which splits again.
        index.reset_path();
        index.insert(660, 101).unwrap();
        assert_eq!(index.path().tail(), NodeId(4));
        let links: Vec<u32> = index
            .read_node(NodeId::ROOT)
            .unwrap()
            .live_entries()
            .iter()
            .map(|e| e.link)
            .collect();
        assert_eq!(links, vec![4, 2, 3, 1]);
        let mut docs = index.lookup(660).unwrap();
        docs.sort_unstable();
        assert_eq!(docs, vec![100, 101]);
    }

    #[test]
    fn test_search_up_after_key_passes_leaf() {
        let (mut index, _dir) = create_test_index(&small_config());
        for key in [10, 20, 30, 40, 50] {
            index.insert(key, 1).unwrap();
        }
        index.reset_path();
        index.insert(5, 2).unwrap();
        assert_eq!(index.path().tail(), NodeId(2));
        // Passes the new leaf's max and has to climb back to the root.
        index.insert(45, 2).unwrap();
        assert_eq!(index.path().tail(), NodeId(1));
        assert_eq!(index.lookup(45).unwrap(), vec![2]);
    }

    #[test]
    fn test_root_split_grows_tree() {
        let (mut index, _dir) = create_test_index(&small_config());
        for key in 1..=200u32 {
            index.insert(key * 3, key).unwrap();
        }

        let stats = index.stats();
        assert!(stats.root_splits >= 1);
        assert!(stats.height >= 3);
        assert_eq!(index.height(), stats.height);
        for key in 1..=200u32 {
            assert_eq!(index.lookup(key * 3).unwrap(), vec![key], "key {}", key * 3);
        }
        assert!(index.lookup(4).unwrap().is_empty());
    }

    #[test]
    fn test_tree_too_tall() {
        let config = IndexConfig {
            max_tree_height: 2,
            cache_nodes: 8,
            ..small_config()
        };
        let (mut index, _dir) = create_test_index(&config);
        let result = (1..=1000u32).try_for_each(|key| index.insert(key, 0));
        assert!(matches!(result, Err(TrieBulkError::TreeTooTall { max: 2 })));
    }

    #[test]
    fn test_reopen_measures_height() {
        let config = small_config();
        let dir = tempdir().unwrap();
        let (idx, size) = (dir.path().join("idx"), dir.path().join("idx_size"));
        let height = {
            let mut index = BTreeIndex::open(&config, &idx, &size).unwrap();
            for key in 1..=100u32 {
                index.insert(key, key).unwrap();
            }
            index.finalize().unwrap();
            index.height()
        };

        let mut index = BTreeIndex::open(&config, &idx, &size).unwrap();
        assert_eq!(index.height(), height);
        assert_eq!(index.lookup(77).unwrap(), vec![77]);
    }

    #[test]
    fn test_split_key_groups_single_key() {
        let groups = vec![(8, vec![1, 2, 3, 4, 5])];
        let (lower, upper, sep) = split_key_groups(NodeId(3), groups).unwrap();
        assert_eq!(sep, 8);
        assert_eq!(lower, vec![(8, vec![1, 2])]);
        assert_eq!(upper, vec![(8, vec![3, 4, 5])]);
    }

    #[test]
    fn test_split_key_groups_rejects_short_chain() {
        let groups = vec![(8, vec![1])];
        assert!(split_key_groups(NodeId(3), groups).is_err());
    }
}
