//! Ingestion: turning documents into keys and keys into index entries.

mod driver;
mod hasher;
mod source;

pub use driver::{IngestDriver, IngestStats};
pub use hasher::{hash_word, WordHasher, STOP_WORDS};
pub use source::{Document, DocumentSource, FileRangeSource, VecSource};
