//! triebulk common types, errors, and utilities.
//!
//! This crate provides the definitions shared by the node cache, the
//! on-disk B-tree and the key buffer.

pub mod bits;
pub mod config;
pub mod error;
pub mod node;
pub mod types;

pub use config::{BufferConfig, EngineConfig, IndexConfig, KeyFailurePolicy};
pub use error::{Result, TrieBulkError};
pub use node::{NodeHeader, NodeId, NodeType};
pub use types::{DocId, Key, Posting, CHAIN_END, KEY_BITS, SENTINEL_KEY};
