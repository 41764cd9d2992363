//! Read-only point lookup.

use super::index::BTreeIndex;
use triebulk_common::{DocId, Key, NodeId, Result, TrieBulkError};

impl BTreeIndex {
    /// Returns every document posted under `key`, in leaf order.
    ///
    /// The chain of a heavily duplicated key may have been split across
    /// several adjacent leaves, all with `max_key == key`, followed by the
    /// leaf holding the rest of the range. Every such child is visited. The
    /// insertion path is left untouched and stays pinned.
    pub fn lookup(&mut self, key: Key) -> Result<Vec<DocId>> {
        let mut docs = Vec::new();
        let mut stack = vec![(NodeId::ROOT, 1usize)];

        while let Some((node_id, depth)) = stack.pop() {
            if depth > self.config.max_tree_height {
                return Err(TrieBulkError::TreeCorrupted(format!(
                    "lookup of key {} descended past {} levels",
                    key, self.config.max_tree_height
                )));
            }

            let node = self.store.get(node_id, self.path.nodes())?;
            if node.is_leaf() {
                if let Some(index) = node.find_key(key) {
                    docs.extend(node.docs_at(index)?);
                }
                continue;
            }

            let live = node.live_entries();
            let start = live.partition_point(|entry| entry.value < key);
            let mut children = Vec::new();
            for entry in &live[start..] {
                children.push(NodeId(entry.link));
                if entry.value > key {
                    break;
                }
            }
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }

        Ok(docs)
    }
}
