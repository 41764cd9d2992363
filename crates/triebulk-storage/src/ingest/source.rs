//! Sources of documents for the ingest driver.

use super::hasher::WordHasher;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use triebulk_common::{DocId, Key, Result, TrieBulkError};

/// One document: its id and its keys in strictly ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_id: DocId,
    pub keys: Vec<Key>,
}

impl Document {
    pub fn new(doc_id: DocId, keys: Vec<Key>) -> Self {
        Self { doc_id, keys }
    }
}

/// Supplies documents one at a time.
pub trait DocumentSource {
    /// Returns the next document, or `None` when the source is exhausted.
    fn next_document(&mut self) -> Result<Option<Document>>;
}

/// Documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    docs: VecDeque<Document>,
}

impl VecSource {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs: docs.into() }
    }

    pub fn remaining(&self) -> usize {
        self.docs.len()
    }
}

impl DocumentSource for VecSource {
    fn next_document(&mut self) -> Result<Option<Document>> {
        Ok(self.docs.pop_front())
    }
}

/// Text files named `<dir>/<prefix><i><ext>` for `i` in `first..=last`.
///
/// File `i` becomes document `i - doc_id_delta`. Missing files are skipped
/// with a warning.
#[derive(Debug, Clone)]
pub struct FileRangeSource {
    dir: PathBuf,
    prefix: String,
    extension: String,
    next: u64,
    last: u64,
    doc_id_delta: u32,
    hasher: WordHasher,
    missing: u64,
}

impl FileRangeSource {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        first: u32,
        last: u32,
        extension: impl Into<String>,
        doc_id_delta: u32,
    ) -> Result<Self> {
        if first < doc_id_delta {
            return Err(TrieBulkError::InvalidParameter {
                name: "doc_id_delta".to_string(),
                value: format!("{} (first file is {})", doc_id_delta, first),
            });
        }
        Ok(Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
            next: first as u64,
            last: last as u64,
            doc_id_delta,
            hasher: WordHasher::new(),
            missing: 0,
        })
    }

    /// Replaces the word hasher, for example to filter stop words.
    pub fn with_hasher(mut self, hasher: WordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Path of input file `i`.
    pub fn file_path(&self, i: u32) -> PathBuf {
        self.dir.join(format!("{}{}{}", self.prefix, i, self.extension))
    }

    /// Files skipped because they could not be found.
    pub fn missing_files(&self) -> u64 {
        self.missing
    }

    fn read_document(&self, path: &Path, doc_id: DocId) -> Result<Option<Document>> {
        match std::fs::read(path) {
            Ok(text) => {
                let keys = self.hasher.document_keys(&text);
                if keys.is_empty() {
                    warn!(path = %path.display(), "input file has no words");
                }
                debug!(path = %path.display(), doc_id, keys = keys.len(), "parsed document");
                Ok(Some(Document::new(doc_id, keys)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl DocumentSource for FileRangeSource {
    fn next_document(&mut self) -> Result<Option<Document>> {
        while self.next <= self.last {
            let i = self.next as u32;
            self.next += 1;
            let path = self.file_path(i);
            match self.read_document(&path, i - self.doc_id_delta)? {
                Some(doc) => return Ok(Some(doc)),
                None => {
                    self.missing += 1;
                    warn!(path = %path.display(), "input file not found, skipping");
                }
            }
        }
        Ok(None)
    }
}
