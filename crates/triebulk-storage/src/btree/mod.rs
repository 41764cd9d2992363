//! Disk-resident B-tree with batch insertion.
//!
//! Nodes are fixed-size records addressed by id (see [`node`]). The
//! [`NodeStore`] keeps a bounded set of them in memory and writes the rest
//! back to the record file. [`BTreeIndex`] inserts sorted batches of
//! postings along a [`SearchPath`] that survives from one key to the next.
//!
//! ```text
//!                    root  [ (20, n2) (MAX, n1) ]
//!                   /                          \
//!   n2 [10 20 | .. chains ..]          n1 [30 40 50 | .. chains ..]
//!      max 20                             max MAX
//! ```

mod index;
mod node;
mod path;
mod search;
mod store;

pub use index::{BTreeIndex, IndexStats};
pub use node::{BTreeNode, Entry, KeyGroup};
pub use path::SearchPath;
pub use store::{NodeStore, StoreStats};
