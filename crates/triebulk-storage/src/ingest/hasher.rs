//! Word extraction and hashing.
//!
//! Words are maximal runs of `[A-Za-z0-9/@_]`. Each word hashes to a 32-bit
//! key with `h = (h >> 1) + code(c)` over its characters, using a fixed
//! table of pseudo-random codes. Upper case folds to lower case first.

use std::collections::HashSet;
use triebulk_common::Key;

/// Common English words dropped when stop-word filtering is enabled.
pub const STOP_WORDS: &[&str] = &[
    "i", "a", "about", "an", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is",
    "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where", "who",
    "will", "with",
];

const DIGIT_CODES: [u32; 10] = [
    28253, 6868, 25547, 27644, 32662, 32757, 20037, 12859, 8723, 9741,
];

const LETTER_CODES: [u32; 26] = [
    2082, 22929, 16541, 4833, 31115, 4639, 29658, 22704, 9930, 13977, 2306, 31673, 22386, 5021,
    28745, 26924, 19072, 6270, 5829, 26777, 15573, 5097, 16512, 23986, 13290, 9161,
];

const fn build_code_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    table[b'/' as usize] = 7711;
    table[b'@' as usize] = 288;
    table[b'_' as usize] = 21538;
    let mut i = 0;
    while i < 10 {
        table[b'0' as usize + i] = DIGIT_CODES[i];
        i += 1;
    }
    let mut i = 0;
    while i < 26 {
        table[b'a' as usize + i] = LETTER_CODES[i];
        table[b'A' as usize + i] = LETTER_CODES[i];
        i += 1;
    }
    table
}

/// Per-byte codes; 0 marks a word separator.
static CODE_TABLE: [u32; 256] = build_code_table();

/// Hashes a single word. Returns 0 if the word has no word characters.
#[inline]
pub fn hash_word(word: &[u8]) -> Key {
    word.iter().fold(0u32, |h, &c| {
        let code = CODE_TABLE[c as usize];
        if code == 0 {
            h
        } else {
            (h >> 1).wrapping_add(code)
        }
    })
}

/// Turns document text into its sorted set of distinct word keys.
#[derive(Debug, Clone, Default)]
pub struct WordHasher {
    stop_keys: HashSet<Key>,
}

impl WordHasher {
    /// A hasher that keeps every word.
    pub fn new() -> Self {
        Self::default()
    }

    /// A hasher that drops [`STOP_WORDS`].
    pub fn with_stop_words() -> Self {
        Self {
            stop_keys: STOP_WORDS.iter().map(|w| hash_word(w.as_bytes())).collect(),
        }
    }

    pub fn filters_stop_words(&self) -> bool {
        !self.stop_keys.is_empty()
    }

    /// Extracts, hashes, sorts and deduplicates the words of `text`.
    pub fn document_keys(&self, text: &[u8]) -> Vec<Key> {
        let mut keys = Vec::new();
        let mut hash = 0u32;
        for &c in text {
            let code = CODE_TABLE[c as usize];
            if code != 0 {
                hash = (hash >> 1).wrapping_add(code);
            } else if hash != 0 {
                keys.push(hash);
                hash = 0;
            }
        }
        if hash != 0 {
            keys.push(hash);
        }

        if !self.stop_keys.is_empty() {
            keys.retain(|k| !self.stop_keys.contains(k));
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_word_codes() {
        assert_eq!(hash_word(b"a"), 2082);
        assert_eq!(hash_word(b"ab"), (2082 >> 1) + 22929);
        assert_eq!(hash_word(b"/"), 7711);
        assert_eq!(hash_word(b"0"), 28253);
        assert_eq!(hash_word(b"-"), 0);
    }

    #[test]
    fn test_case_folding() {
        assert_eq!(hash_word(b"Hello"), hash_word(b"hello"));
        assert_eq!(hash_word(b"WORLD_42"), hash_word(b"world_42"));
    }

    #[test]
    fn test_document_keys_sorted_distinct() {
        let hasher = WordHasher::new();
        let keys = hasher.document_keys(b"the cat, the Dog; the cat!");
        let mut expected = vec![hash_word(b"the"), hash_word(b"cat"), hash_word(b"dog")];
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(keys, expected);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_word_at_end_of_text() {
        let hasher = WordHasher::new();
        assert_eq!(hasher.document_keys(b"tail"), vec![hash_word(b"tail")]);
        assert!(hasher.document_keys(b"  ... ,,").is_empty());
    }

    #[test]
    fn test_stop_words() {
        let plain = WordHasher::new();
        let filtered = WordHasher::with_stop_words();
        assert!(!plain.filters_stop_words());
        assert!(filtered.filters_stop_words());

        let text = b"The index of a B-tree";
        let all = plain.document_keys(text);
        let kept = filtered.document_keys(text);
        assert!(all.contains(&hash_word(b"the")));
        assert!(!kept.contains(&hash_word(b"the")));
        assert!(!kept.contains(&hash_word(b"of")));
        assert!(kept.contains(&hash_word(b"index")));
        assert!(kept.contains(&hash_word(b"tree")));
    }
}
