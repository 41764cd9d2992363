//! Error types for triebulk.

use thiserror::Error;

/// Result type alias using TrieBulkError.
pub type Result<T> = std::result::Result<T, TrieBulkError>;

/// Errors that can occur while building or reading a triebulk index.
///
/// Two tiers exist. Per-key data problems ([`TrieBulkError::is_recoverable`])
/// may be skipped by the ingest driver. Everything else means the index file
/// or one of the in-memory structures can no longer be trusted.
#[derive(Debug, Error)]
pub enum TrieBulkError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read of node {node_id}: expected {expected} bytes, got {actual}")]
    ShortRead {
        node_id: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Size file corrupted: expected 0 or 4 bytes, found {len}")]
    SizeFileCorrupted { len: u64 },

    // Node cache errors
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: u32 },

    #[error("Node cache full, every slot is pinned")]
    CacheFull,

    #[error("Invalid node type tag: {0}")]
    InvalidNodeType(u32),

    #[error("Record size mismatch: expected {expected}, got {actual}")]
    RecordSizeMismatch { expected: usize, actual: usize },

    // B-tree errors
    #[error("B-tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("B-tree height limit of {max} levels exceeded")]
    TreeTooTall { max: usize },

    // Key buffer errors
    #[error("Bucket split did not increase LCP: parent {parent} bits, child {child} bits")]
    BucketSplitInvariant { parent: u32, child: u32 },

    #[error("Key buffer exhausted: {0}")]
    BufferExhausted(String),

    #[error("No bucket found for key {key:#010x}")]
    KeyNotPlaced { key: u32 },

    #[error("Key {key:#010x} out of order after {previous:#010x}")]
    KeyOutOfOrder { key: u32, previous: u32 },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrieBulkError {
    /// Returns true for failures scoped to a single key.
    ///
    /// The ingest driver may log and skip these; all other errors abort.
    /// `KeyNotPlaced` is fatal; the buffer places or evicts for every key, so
    /// it only arises from a broken trie.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrieBulkError::KeyOutOfOrder { .. })
    }
}
