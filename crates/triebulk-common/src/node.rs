//! Node identifiers and the on-disk node header.

use crate::error::{Result, TrieBulkError};
use crate::types::Key;
use serde::{Deserialize, Serialize};

/// Identifier of a B-tree node.
///
/// Node ids are handed out in increasing order and never reused, so the id
/// doubles as the record number in the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The root always lives in record 0.
    pub const ROOT: NodeId = NodeId(0);

    /// Returns the raw id.
    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Byte offset of this node's record in a file of fixed-size records.
    #[inline]
    pub fn file_offset(&self, record_size: usize) -> u64 {
        (self.0 as u64) * (record_size as u64)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Role of a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum NodeType {
    /// The single top node, routing entries only.
    Root = 0,
    /// Routing node between the root and the leaves.
    Internal = 1,
    /// Keys with document chains.
    Leaf = 2,
}

impl NodeType {
    /// Decodes the on-disk tag.
    pub fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(NodeType::Root),
            1 => Ok(NodeType::Internal),
            2 => Ok(NodeType::Leaf),
            other => Err(TrieBulkError::InvalidNodeType(other)),
        }
    }

    /// Returns true for root and internal nodes.
    #[inline]
    pub fn is_routing(&self) -> bool {
        !matches!(self, NodeType::Leaf)
    }
}

/// Header at the start of every node record.
///
/// Layout (16 bytes, little-endian):
/// - keys_count: 2 bytes
/// - free_pos: 2 bytes
/// - node_id: 4 bytes
/// - node_type: 4 bytes
/// - max_key: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHeader {
    /// Live entries at the front of the entry array.
    pub keys_count: u16,
    /// Next free chain cell, counting down from the tail of the entry array.
    pub free_pos: u16,
    /// Record number of this node.
    pub node_id: NodeId,
    /// Role of the node.
    pub node_type: NodeType,
    /// Upper routing bound. The rightmost node of each level holds `Key::MAX`.
    pub max_key: Key,
}

impl NodeHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Creates an empty header for a node with `entries` cells.
    pub fn new(node_id: NodeId, node_type: NodeType, entries: usize) -> Self {
        Self {
            keys_count: 0,
            free_pos: entries.saturating_sub(1) as u16,
            node_id,
            node_type,
            max_key: 0,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.keys_count.to_le_bytes());
        buf[2..4].copy_from_slice(&self.free_pos.to_le_bytes());
        buf[4..8].copy_from_slice(&self.node_id.0.to_le_bytes());
        buf[8..12].copy_from_slice(&(self.node_type as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.max_key.to_le_bytes());
        buf
    }

    /// Deserializes the header from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(TrieBulkError::RecordSizeMismatch {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let keys_count = u16::from_le_bytes([buf[0], buf[1]]);
        let free_pos = u16::from_le_bytes([buf[2], buf[3]]);
        let node_id = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let tag = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let max_key = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

        Ok(Self {
            keys_count,
            free_pos,
            node_id: NodeId(node_id),
            node_type: NodeType::from_tag(tag)?,
            max_key,
        })
    }
}
