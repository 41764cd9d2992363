//! Scalar types shared by the index, the key buffer and the ingest driver.

/// A 32-bit key, normally the hash of a source word.
///
/// Bit 0 is the most significant bit; the key buffer branches on bits in
/// that order so trie order matches numeric order.
pub type Key = u32;

/// Identifier of a source document.
pub type DocId = u32;

/// Width of a key in bits.
pub const KEY_BITS: u32 = Key::BITS;

/// Routing bound carried by the rightmost node of every level.
pub const SENTINEL_KEY: Key = Key::MAX;

/// Terminator of a document chain. Cell 0 is never handed out as a chain cell.
pub const CHAIN_END: u32 = 0;

/// A (key, document) pair as buffered and flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Posting {
    pub key: Key,
    pub doc_id: DocId,
}

impl Posting {
    /// Creates a new posting.
    #[inline]
    pub fn new(key: Key, doc_id: DocId) -> Self {
        Self { key, doc_id }
    }
}
