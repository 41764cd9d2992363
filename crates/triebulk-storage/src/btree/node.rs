//! B-tree node record.
//!
//! A node is a header followed by a fixed number of entry cells. The front
//! of the cell array holds the sorted live entries (`keys_count` of them).
//! In routing nodes each live entry is (separator, child id). In leaves each
//! live entry is (key, chain head) and the cells from the tail down to
//! `free_pos + 1` hold document chains: (doc id, next cell or 0).
//!
//! ```text
//! +--------------------+ 0
//! | NodeHeader         | 16
//! +--------------------+
//! | value: u32         |
//! | link: i32          | entry 0
//! | ...                |
//! | value: u32         |
//! | link: i32          | entry N-1
//! +--------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use triebulk_cache::CachedNode;
use triebulk_common::{
    DocId, Key, NodeHeader, NodeId, NodeType, Result, TrieBulkError, CHAIN_END,
};

/// One cell of a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Entry {
    /// Key, separator or document id.
    pub value: u32,
    /// Child node id, chain head or next chain cell.
    pub link: u32,
}

impl Entry {
    /// Size of an encoded entry in bytes.
    pub const SIZE: usize = 8;

    /// Creates a new entry.
    #[inline]
    pub fn new(value: u32, link: u32) -> Self {
        Self { value, link }
    }
}

/// A key of a leaf together with every document on its chain.
pub type KeyGroup = (Key, Vec<DocId>);

/// In-memory form of a node record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeNode {
    pub header: NodeHeader,
    entries: Vec<Entry>,
}

impl CachedNode for BTreeNode {
    fn node_id(&self) -> NodeId {
        self.header.node_id
    }
}

impl BTreeNode {
    /// Creates an empty node with `capacity` cells.
    pub fn new(node_id: NodeId, node_type: NodeType, capacity: usize) -> Self {
        Self {
            header: NodeHeader::new(node_id, node_type, capacity),
            entries: vec![Entry::default(); capacity],
        }
    }

    /// Bytes needed to store a node with `capacity` cells.
    #[inline]
    pub fn record_size(capacity: usize) -> usize {
        NodeHeader::SIZE + capacity * Entry::SIZE
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.header.node_id
    }

    #[inline]
    pub fn node_type(&self) -> NodeType {
        self.header.node_type
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.header.node_type == NodeType::Leaf
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn keys_count(&self) -> usize {
        self.header.keys_count as usize
    }

    #[inline]
    pub fn max_key(&self) -> Key {
        self.header.max_key
    }

    #[inline]
    pub fn free_pos(&self) -> usize {
        self.header.free_pos as usize
    }

    /// Live entries, sorted by value.
    #[inline]
    pub fn live_entries(&self) -> &[Entry] {
        &self.entries[..self.keys_count()]
    }

    /// Cell at `index`, live or not.
    #[inline]
    pub fn entry(&self, index: usize) -> Entry {
        self.entries[index]
    }

    /// Serializes the node to a record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::record_size(self.capacity()));
        buf.put_slice(&self.header.to_bytes());
        for entry in &self.entries {
            buf.put_u32_le(entry.value);
            buf.put_i32_le(entry.link as i32);
        }
        buf.to_vec()
    }

    /// Deserializes a record holding `capacity` cells.
    pub fn from_bytes(data: &[u8], capacity: usize) -> Result<Self> {
        let expected = Self::record_size(capacity);
        if data.len() != expected {
            return Err(TrieBulkError::RecordSizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let header = NodeHeader::from_bytes(&data[..NodeHeader::SIZE])?;
        if header.keys_count as usize > capacity || header.free_pos as usize >= capacity {
            return Err(TrieBulkError::TreeCorrupted(format!(
                "{} header out of range: {} keys, free cell {}, capacity {}",
                header.node_id, header.keys_count, header.free_pos, capacity
            )));
        }

        let mut cursor = &data[NodeHeader::SIZE..];
        let mut entries = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let value = cursor.get_u32_le();
            let link = cursor.get_i32_le() as u32;
            entries.push(Entry { value, link });
        }

        Ok(Self { header, entries })
    }

    // =========================================================================
    // Leaf operations
    // =========================================================================

    /// True when a new key and its first chain cell fit without the key
    /// region and the chain region touching.
    #[inline]
    pub fn has_room_for_key(&self) -> bool {
        (self.keys_count() as isize) + 1 < (self.free_pos() as isize) - 1
    }

    /// Position of `key` among the live entries.
    pub fn find_key(&self, key: Key) -> Option<usize> {
        self.live_entries()
            .binary_search_by(|entry| entry.value.cmp(&key))
            .ok()
    }

    /// Documents on the chain of live entry `index`.
    pub fn docs_at(&self, index: usize) -> Result<Vec<DocId>> {
        let mut docs = Vec::new();
        let mut cell = self.entries[index].link;
        while cell != CHAIN_END {
            let pos = cell as usize;
            if pos <= self.free_pos() || pos >= self.capacity() || docs.len() >= self.capacity() {
                return Err(TrieBulkError::TreeCorrupted(format!(
                    "{} chain of key {} reaches cell {}",
                    self.id(),
                    self.entries[index].value,
                    cell
                )));
            }
            docs.push(self.entries[pos].value);
            cell = self.entries[pos].link;
        }
        Ok(docs)
    }

    /// Every key of the leaf with its documents, in key order.
    pub fn leaf_groups(&self) -> Result<Vec<KeyGroup>> {
        let mut groups = Vec::with_capacity(self.keys_count());
        for i in 0..self.keys_count() {
            groups.push((self.entries[i].value, self.docs_at(i)?));
        }
        Ok(groups)
    }

    /// Inserts (key, doc) scanning from `start`. Returns the position of the key.
    ///
    /// An existing key gets the document appended to the end of its chain;
    /// a new key is shifted into sorted position with a fresh one-cell chain.
    pub fn insert_posting(&mut self, key: Key, doc_id: DocId, start: usize) -> Result<usize> {
        let count = self.keys_count();
        let mut pos = count;
        for i in start.min(count)..count {
            let value = self.entries[i].value;
            if value == key {
                self.append_doc(i, doc_id)?;
                return Ok(i);
            }
            if value > key {
                pos = i;
                break;
            }
        }

        if !self.has_room_for_key() {
            return Err(TrieBulkError::Internal(format!(
                "{} has no room for key {}",
                self.id(),
                key
            )));
        }

        let cell = self.take_chain_cell(doc_id)?;
        self.entries.copy_within(pos..count, pos + 1);
        self.entries[pos] = Entry::new(key, cell);
        self.header.keys_count += 1;
        Ok(pos)
    }

    /// Appends a document to the chain of live entry `index`.
    fn append_doc(&mut self, index: usize, doc_id: DocId) -> Result<()> {
        let cell = self.take_chain_cell(doc_id)?;
        let mut tail = self.entries[index].link as usize;
        if tail == CHAIN_END as usize {
            self.entries[index].link = cell;
            return Ok(());
        }
        let mut steps = 0;
        while self.entries[tail].link != CHAIN_END {
            tail = self.entries[tail].link as usize;
            steps += 1;
            if steps > self.capacity() || tail >= self.capacity() {
                return Err(TrieBulkError::TreeCorrupted(format!(
                    "{} chain of entry {} does not terminate",
                    self.id(),
                    index
                )));
            }
        }
        self.entries[tail].link = cell;
        Ok(())
    }

    /// Claims the next free chain cell for `doc_id`.
    fn take_chain_cell(&mut self, doc_id: DocId) -> Result<u32> {
        let cell = self.free_pos();
        if cell <= self.keys_count() {
            return Err(TrieBulkError::Internal(format!(
                "{} chain region exhausted",
                self.id()
            )));
        }
        self.entries[cell] = Entry::new(doc_id, CHAIN_END);
        self.header.free_pos -= 1;
        Ok(cell as u32)
    }

    /// Rewrites the leaf to hold exactly `groups`, with compact chains.
    pub fn rebuild_leaf(&mut self, groups: &[KeyGroup]) -> Result<()> {
        let capacity = self.capacity();
        self.entries.iter_mut().for_each(|e| *e = Entry::default());
        self.header.keys_count = 0;
        self.header.free_pos = (capacity - 1) as u16;

        for (i, (key, docs)) in groups.iter().enumerate() {
            if i >= self.free_pos() {
                return Err(TrieBulkError::Internal(format!(
                    "{} cannot hold {} key groups",
                    self.id(),
                    groups.len()
                )));
            }
            self.entries[i] = Entry::new(*key, CHAIN_END);
            self.header.keys_count += 1;

            let mut prev: Option<usize> = None;
            for &doc_id in docs {
                let cell = self.take_chain_cell(doc_id)?;
                match prev {
                    None => self.entries[i].link = cell,
                    Some(p) => self.entries[p].link = cell,
                }
                prev = Some(cell as usize);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Routing operations
    // =========================================================================

    /// First live entry at or after `start` whose separator covers `key`.
    pub fn route(&self, key: Key, start: usize) -> Option<(usize, NodeId)> {
        let live = self.live_entries();
        (start.min(live.len())..live.len())
            .find(|&i| key <= live[i].value)
            .map(|i| (i, NodeId(live[i].link)))
    }

    /// Replaces the routing entries.
    pub fn set_routing(&mut self, routing: &[Entry]) {
        self.entries.iter_mut().for_each(|e| *e = Entry::default());
        self.entries[..routing.len()].copy_from_slice(routing);
        self.header.keys_count = routing.len() as u16;
    }

    /// Index of the routing entry that points at `child`.
    pub fn child_position(&self, child: NodeId) -> Option<usize> {
        self.live_entries().iter().position(|e| e.link == child.0)
    }

    /// Inserts (separator, child) directly before the entry for `sibling`,
    /// the node `child` was split from. Equal separators keep split order.
    pub fn insert_routing_before(
        &mut self,
        sibling: NodeId,
        separator: Key,
        child: NodeId,
    ) -> Result<usize> {
        let count = self.keys_count();
        if count >= self.capacity() {
            return Err(TrieBulkError::Internal(format!(
                "{} has no room for separator {}",
                self.id(),
                separator
            )));
        }
        let pos = self.child_position(sibling).ok_or_else(|| {
            TrieBulkError::TreeCorrupted(format!("{} has no entry for {}", self.id(), sibling))
        })?;
        self.entries.copy_within(pos..count, pos + 1);
        self.entries[pos] = Entry::new(separator, child.0);
        self.header.keys_count += 1;
        Ok(pos)
    }

    /// Sets the routing entry at `index` directly.
    pub fn put_routing(&mut self, index: usize, separator: Key, child: NodeId) {
        self.entries[index] = Entry::new(separator, child.0);
        if index >= self.keys_count() {
            self.header.keys_count = (index + 1) as u16;
        }
    }
}
