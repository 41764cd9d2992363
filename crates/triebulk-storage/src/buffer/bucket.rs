//! Bounded sorted groups of postings.

use triebulk_common::bits::{get_bit, lcp};
use triebulk_common::{DocId, Key, Posting, Result, TrieBulkError, KEY_BITS};

/// A sorted run of postings sharing at least `lcp_bits` leading key bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    entries: Vec<Posting>,
    /// Minimum LCP over all pairs of keys; 32 with fewer than two entries.
    lcp_bits: u32,
    capacity: usize,
}

impl Bucket {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            lcp_bits: KEY_BITS,
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn lcp_bits(&self) -> u32 {
        self.lcp_bits
    }

    #[inline]
    pub fn entries(&self) -> &[Posting] {
        &self.entries
    }

    #[inline]
    pub fn first_key(&self) -> Option<Key> {
        self.entries.first().map(|p| p.key)
    }

    /// Inserts a posting before any existing entries with the same key.
    pub fn add(&mut self, key: Key, doc_id: DocId) -> Result<()> {
        if self.is_full() {
            return Err(TrieBulkError::BufferExhausted(format!(
                "bucket of {} entries is full",
                self.capacity
            )));
        }
        let pos = self.entries.partition_point(|p| p.key < key);
        if pos > 0 {
            self.lcp_bits = self.lcp_bits.min(lcp(self.entries[pos - 1].key, key));
        }
        if pos < self.entries.len() {
            self.lcp_bits = self.lcp_bits.min(lcp(self.entries[pos].key, key));
        }
        self.entries.insert(pos, Posting::new(key, doc_id));
        Ok(())
    }

    /// Empties the bucket and returns its postings in key order.
    pub fn take_all(&mut self) -> Vec<Posting> {
        self.lcp_bits = KEY_BITS;
        std::mem::take(&mut self.entries)
    }

    /// Keeps only the first posting and returns the rest.
    pub fn take_tail(&mut self) -> Vec<Posting> {
        let tail = self.entries.split_off(self.entries.len().min(1));
        self.lcp_bits = KEY_BITS;
        tail
    }

    /// Moves the postings whose key has a 0 at `bit` into a new bucket.
    ///
    /// Keys agree on every bit before `bit`, so the zeros form a prefix of
    /// the sorted entries. Both halves get their LCP recomputed.
    pub fn split_off_zeros(&mut self, bit: u32) -> Bucket {
        let split = self.entries.partition_point(|p| get_bit(p.key, bit) == 0);
        let ones = self.entries.split_off(split);
        let zeros = std::mem::replace(&mut self.entries, ones);
        self.lcp_bits = min_adjacent_lcp(&self.entries);

        let mut lower = Bucket::new(self.capacity);
        lower.lcp_bits = min_adjacent_lcp(&zeros);
        lower.entries.extend(zeros);
        lower
    }
}

/// Minimum LCP of neighbouring keys, which equals the minimum over all
/// pairs for sorted keys.
fn min_adjacent_lcp(entries: &[Posting]) -> u32 {
    entries
        .windows(2)
        .map(|w| lcp(w[0].key, w[1].key))
        .min()
        .unwrap_or(KEY_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_of(bucket: &Bucket) -> Vec<Key> {
        bucket.entries().iter().map(|p| p.key).collect()
    }

    #[test]
    fn test_add_sorted_with_lcp() {
        let mut bucket = Bucket::new(4);
        bucket.add(0x0000_00F0, 1).unwrap();
        assert_eq!(bucket.lcp_bits(), 32);
        bucket.add(0x0000_00F1, 2).unwrap();
        assert_eq!(bucket.lcp_bits(), 31);
        bucket.add(0x0000_0010, 3).unwrap();
        assert_eq!(bucket.lcp_bits(), 24);
        assert_eq!(keys_of(&bucket), vec![0x10, 0xF0, 0xF1]);
        assert_eq!(bucket.first_key(), Some(0x10));
    }

    #[test]
    fn test_add_equal_keys() {
        let mut bucket = Bucket::new(3);
        bucket.add(9, 1).unwrap();
        bucket.add(9, 2).unwrap();
        assert_eq!(bucket.lcp_bits(), 32);
        assert_eq!(bucket.entries()[0], Posting::new(9, 2));
    }

    #[test]
    fn test_add_full() {
        let mut bucket = Bucket::new(2);
        bucket.add(1, 1).unwrap();
        bucket.add(2, 1).unwrap();
        assert!(bucket.is_full());
        assert!(matches!(
            bucket.add(3, 1),
            Err(TrieBulkError::BufferExhausted(_))
        ));
    }

    #[test]
    fn test_split_off_zeros() {
        let mut bucket = Bucket::new(8);
        for key in [0x8000_0001u32, 0x8000_0002, 0xC000_0000, 0xC000_0001] {
            bucket.add(key, 0).unwrap();
        }
        assert_eq!(bucket.lcp_bits(), 1);

        let lower = bucket.split_off_zeros(1);
        assert_eq!(keys_of(&lower), vec![0x8000_0001, 0x8000_0002]);
        assert_eq!(lower.lcp_bits(), 30);
        assert_eq!(keys_of(&bucket), vec![0xC000_0000, 0xC000_0001]);
        assert_eq!(bucket.lcp_bits(), 31);
    }

    #[test]
    fn test_take_tail_keeps_first() {
        let mut bucket = Bucket::new(4);
        for doc in 1..=3 {
            bucket.add(5, doc).unwrap();
        }
        let tail = bucket.take_tail();
        assert_eq!(bucket.len(), 1);
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|p| p.key == 5));
    }

    #[test]
    fn test_take_all_resets() {
        let mut bucket = Bucket::new(4);
        bucket.add(1, 1).unwrap();
        bucket.add(2, 1).unwrap();
        let all = bucket.take_all();
        assert_eq!(all.len(), 2);
        assert!(bucket.is_empty());
        assert_eq!(bucket.lcp_bits(), 32);
    }
}
