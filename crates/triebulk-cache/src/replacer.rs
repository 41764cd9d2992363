//! Slot replacement policy for the node cache.

use crate::frame::SlotId;

/// Trait for slot replacement algorithms.
pub trait Replacer {
    /// Selects a victim among slots for which `evictable` returns true.
    ///
    /// Returns None if no slot qualifies.
    fn victim<F>(&mut self, evictable: F) -> Option<SlotId>
    where
        F: Fn(SlotId) -> bool;

    /// Records that `slot` was just filled.
    fn record_fill(&mut self, slot: SlotId);

    /// Returns the number of slots the replacer scans.
    fn capacity(&self) -> usize;
}

/// Circular scan replacement.
///
/// The hand sits just past the most recently filled slot. A scan walks from
/// the hand to the end of the array, then wraps to the first unreserved slot
/// and stops at the hand. Reserved slots at the front are never offered; the
/// node cache reserves slot 0 for the root.
pub struct CircularReplacer {
    /// Total number of slots.
    num_slots: usize,
    /// Leading slots excluded from scans.
    reserved: usize,
    /// Position where the next scan starts.
    hand: usize,
}

impl CircularReplacer {
    /// Creates a replacer over `num_slots` slots with `reserved` pinned slots.
    pub fn new(num_slots: usize, reserved: usize) -> Self {
        let reserved = reserved.min(num_slots);
        Self {
            num_slots,
            reserved,
            hand: reserved,
        }
    }

    /// Returns the current hand position.
    pub fn hand(&self) -> usize {
        self.hand
    }
}

impl Replacer for CircularReplacer {
    fn victim<F>(&mut self, evictable: F) -> Option<SlotId>
    where
        F: Fn(SlotId) -> bool,
    {
        let start = self.hand.max(self.reserved);
        let scan = (start..self.num_slots).chain(self.reserved..start);

        for pos in scan {
            let slot = SlotId(pos as u32);
            if evictable(slot) {
                return Some(slot);
            }
        }
        None
    }

    fn record_fill(&mut self, slot: SlotId) {
        let next = slot.0 as usize + 1;
        self.hand = if next >= self.num_slots {
            self.reserved
        } else {
            next
        };
    }

    fn capacity(&self) -> usize {
        self.num_slots
    }
}
