//! Bit operations on 32-bit keys.
//!
//! Positions count from the most significant bit: position 0 is bit 31 of
//! the integer. Common prefixes are measured in the same direction.

use crate::types::{Key, KEY_BITS};

/// Returns the bit of `key` at `pos` (0 = most significant).
#[inline]
pub fn get_bit(key: Key, pos: u32) -> u8 {
    debug_assert!(pos < KEY_BITS);
    ((key >> (KEY_BITS - 1 - pos)) & 1) as u8
}

/// Returns `key` with the bit at `pos` set to `bit`.
#[inline]
pub fn set_bit(key: Key, pos: u32, bit: u8) -> Key {
    debug_assert!(pos < KEY_BITS);
    let mask = 1 << (KEY_BITS - 1 - pos);
    if bit == 0 {
        key & !mask
    } else {
        key | mask
    }
}

/// Number of leading bits `a` and `b` share. Equal keys share all 32.
#[inline]
pub fn lcp(a: Key, b: Key) -> u32 {
    (a ^ b).leading_zeros()
}

/// Result of [`lcp_with_next_bits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixSplit {
    /// Shared leading bits.
    pub lcp: u32,
    /// Bit of each operand right after the shared prefix, `None` when the
    /// operands are equal.
    pub next_bits: Option<(u8, u8)>,
}

/// LCP of `a` and `b` together with the first differing bit of each.
#[inline]
pub fn lcp_with_next_bits(a: Key, b: Key) -> PrefixSplit {
    let lcp = lcp(a, b);
    let next_bits = (lcp < KEY_BITS).then(|| (get_bit(a, lcp), get_bit(b, lcp)));
    PrefixSplit { lcp, next_bits }
}
