//! Configuration structures for triebulk.

use crate::error::{Result, TrieBulkError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Largest entry count a node record can carry (header counters are 16-bit).
pub const MAX_NODE_ENTRIES: usize = i16::MAX as usize;

/// Deepest tree accepted. Also bounds the pinned search path.
pub const MAX_TREE_HEIGHT: usize = 64;

/// Largest bucket count the snapshot format can address (trie children are i16).
pub const MAX_BUCKETS_LIMIT: usize = (i16::MAX as usize) / 2;

/// Configuration for the on-disk B-tree and its node cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Entry cells per node record. Leaves share these between keys and
    /// document-chain cells; internal nodes use all of them for routing.
    pub node_entries: usize,
    /// Maximum number of levels, root included.
    pub max_tree_height: usize,
    /// Number of nodes held in the in-memory cache. 0 sizes the cache from
    /// available memory.
    pub cache_nodes: usize,
    /// Enable fsync after record writes.
    pub fsync_enabled: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            node_entries: 5100,
            max_tree_height: 10,
            cache_nodes: 10_000,
            fsync_enabled: false,
        }
    }
}

impl IndexConfig {
    /// Checks that the values describe a usable tree.
    pub fn validate(&self) -> Result<()> {
        if self.node_entries < 8 || self.node_entries > MAX_NODE_ENTRIES {
            return Err(TrieBulkError::InvalidParameter {
                name: "node_entries".to_string(),
                value: self.node_entries.to_string(),
            });
        }
        if self.max_tree_height < 2 || self.max_tree_height > MAX_TREE_HEIGHT {
            return Err(TrieBulkError::InvalidParameter {
                name: "max_tree_height".to_string(),
                value: self.max_tree_height.to_string(),
            });
        }
        // Every level of the search path stays pinned, so the cache needs
        // room for the path plus the two nodes a root split allocates.
        if self.cache_nodes != 0 && self.cache_nodes < self.max_tree_height + 2 {
            return Err(TrieBulkError::ConfigError(format!(
                "cache_nodes ({}) must be at least max_tree_height + 2 ({})",
                self.cache_nodes,
                self.max_tree_height + 2
            )));
        }
        Ok(())
    }
}

/// Configuration for the trie-organized key buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum (key, document) pairs per bucket.
    pub bucket_capacity: usize,
    /// Maximum number of live buckets.
    pub max_buckets: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: 1280,
            max_buckets: 400,
        }
    }
}

impl BufferConfig {
    /// Trie node capacity, always twice the bucket count.
    pub fn max_trie_nodes(&self) -> usize {
        self.max_buckets * 2
    }

    /// Checks that the values describe a usable buffer.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_capacity < 2 {
            return Err(TrieBulkError::InvalidParameter {
                name: "bucket_capacity".to_string(),
                value: self.bucket_capacity.to_string(),
            });
        }
        if self.max_buckets < 2 || self.max_buckets > MAX_BUCKETS_LIMIT {
            return Err(TrieBulkError::InvalidParameter {
                name: "max_buckets".to_string(),
                value: self.max_buckets.to_string(),
            });
        }
        Ok(())
    }
}

/// What the ingest driver does when a single key cannot be buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFailurePolicy {
    /// Log a warning, count the key and continue with the next one.
    #[default]
    Skip,
    /// Stop ingestion and return the error.
    Abort,
}

/// Top-level configuration for an ingest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the index files.
    pub data_dir: PathBuf,
    /// Base file name of the index.
    pub index_name: String,
    /// B-tree settings.
    pub index: IndexConfig,
    /// Key buffer settings.
    pub buffer: BufferConfig,
    /// Handling of per-key failures.
    pub on_key_failure: KeyFailurePolicy,
    /// Dump the key buffer to `<index>_buffer` before draining.
    pub write_snapshot: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            index_name: "index".to_string(),
            index: IndexConfig::default(),
            buffer: BufferConfig::default(),
            on_key_failure: KeyFailurePolicy::default(),
            write_snapshot: false,
        }
    }
}

impl EngineConfig {
    /// Path of the node record file.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_name)
    }

    /// Path of the persisted node count.
    pub fn size_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_size", self.index_name))
    }

    /// Path of the key buffer snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_buffer", self.index_name))
    }

    /// Validates every nested section.
    pub fn validate(&self) -> Result<()> {
        if self.index_name.is_empty() {
            return Err(TrieBulkError::ConfigError(
                "index_name must not be empty".to_string(),
            ));
        }
        self.index.validate()?;
        self.buffer.validate()
    }
}
