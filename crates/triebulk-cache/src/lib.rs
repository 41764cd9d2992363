//! Node cache for triebulk.
//!
//! This crate provides the in-memory half of the node store:
//! - Fixed-capacity slot array with slot 0 reserved for the root
//! - Circular eviction that skips nodes pinned by the active search path
//! - Dirty tracking with write-back handed to the caller

mod frame;
mod pool;
mod replacer;

pub use frame::{CacheSlot, CachedNode, SlotId};
pub use pool::{CacheStats, EvictedNode, NodeCache, NodeCacheConfig};
pub use replacer::{CircularReplacer, Replacer};
