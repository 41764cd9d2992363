//! Document-at-a-time ingestion into the buffer and the B-tree.

use super::source::DocumentSource;
use crate::btree::{BTreeIndex, IndexStats};
use crate::buffer::{BufferStats, KeyBuffer};
use tracing::{debug, info, warn};
use triebulk_cache::CacheStats;
use triebulk_common::{
    DocId, EngineConfig, Key, KeyFailurePolicy, Result, TrieBulkError,
};

/// Summary of an ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub documents: u64,
    /// Keys offered by the documents, skipped ones included.
    pub keys: u64,
    pub skipped_keys: u64,
    pub index: IndexStats,
    pub buffer: BufferStats,
    pub cache: CacheStats,
}

/// Feeds documents through the key buffer into the B-tree.
///
/// Every key goes to the buffer; the B-tree only sees sorted batches flushed
/// by bucket evictions and, at [`IngestDriver::finish`], the final drain.
pub struct IngestDriver {
    config: EngineConfig,
    index: BTreeIndex,
    buffer: KeyBuffer,
    documents: u64,
    keys: u64,
    skipped: u64,
}

impl IngestDriver {
    /// Opens (or creates) the index under `config.data_dir`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let index = BTreeIndex::open(&config.index, &config.index_path(), &config.size_path())?;
        let buffer = KeyBuffer::new(config.buffer.clone())?;
        info!(
            path = %config.index_path().display(),
            bucket_capacity = config.buffer.bucket_capacity,
            max_buckets = config.buffer.max_buckets,
            policy = ?config.on_key_failure,
            "ingest driver ready"
        );
        Ok(Self {
            config,
            index,
            buffer,
            documents: 0,
            keys: 0,
            skipped: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &BTreeIndex {
        &self.index
    }

    /// Mutable access to the index, for lookups between documents.
    pub fn index_mut(&mut self) -> &mut BTreeIndex {
        &mut self.index
    }

    pub fn buffer(&self) -> &KeyBuffer {
        &self.buffer
    }

    /// Buffers the keys of one document. `keys` must be strictly ascending.
    ///
    /// A key that fails on its own is skipped or aborts the run, depending
    /// on the configured [`KeyFailurePolicy`]. The B-tree search path is
    /// reset afterwards in either case.
    pub fn ingest_document(&mut self, doc_id: DocId, keys: &[Key]) -> Result<()> {
        let result = self.buffer_keys(doc_id, keys);
        self.index.reset_path();
        self.documents += 1;
        debug!(doc_id, keys = keys.len(), "document buffered");
        result
    }

    /// Ingests every document of `source`. Returns the number ingested.
    pub fn ingest_all<S: DocumentSource>(&mut self, source: &mut S) -> Result<u64> {
        let mut count = 0;
        while let Some(doc) = source.next_document()? {
            self.ingest_document(doc.doc_id, &doc.keys)?;
            count += 1;
        }
        Ok(count)
    }

    /// Current counters. Index and cache figures are final only after
    /// [`IngestDriver::finish`].
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            documents: self.documents,
            keys: self.keys,
            skipped_keys: self.skipped,
            index: self.index.stats(),
            buffer: self.buffer.stats(),
            cache: self.index.cache_stats(),
        }
    }

    /// Optionally snapshots the buffer, drains it into the B-tree and
    /// writes everything to disk.
    pub fn finish(mut self) -> Result<IngestStats> {
        if self.config.write_snapshot {
            self.buffer.write_snapshot(&self.config.snapshot_path())?;
        }
        let drained = self.buffer.drain_all(&mut self.index)?;
        self.index.finalize()?;

        let stats = self.stats();
        info!(
            documents = stats.documents,
            keys = stats.keys,
            skipped = stats.skipped_keys,
            drained,
            evictions = stats.buffer.evictions,
            nodes = self.index.node_count(),
            height = stats.index.height,
            "ingest finished"
        );
        Ok(stats)
    }

    fn buffer_keys(&mut self, doc_id: DocId, keys: &[Key]) -> Result<()> {
        let mut previous: Option<Key> = None;
        for &key in keys {
            self.keys += 1;
            let outcome = match previous {
                Some(prev) if key <= prev => Err(TrieBulkError::KeyOutOfOrder {
                    key,
                    previous: prev,
                }),
                _ => self.buffer.insert(key, doc_id, &mut self.index),
            };
            match outcome {
                Ok(()) => previous = Some(key),
                Err(e) if e.is_recoverable() => self.on_key_failure(doc_id, key, e)?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn on_key_failure(&mut self, doc_id: DocId, key: Key, err: TrieBulkError) -> Result<()> {
        match self.config.on_key_failure {
            KeyFailurePolicy::Skip => {
                self.skipped += 1;
                warn!(doc_id, key, error = %err, "skipping key");
                Ok(())
            }
            KeyFailurePolicy::Abort => Err(err),
        }
    }
}
