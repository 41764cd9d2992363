//! Record file for fixed-size B-tree nodes and the companion node count.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use triebulk_common::{NodeId, Result, TrieBulkError};

/// Largest offset reached with a single absolute seek. Anything further is
/// reached in bounded relative steps.
const MAX_ABSOLUTE_SEEK: u64 = 2_000_000_000;

/// Configuration for the node record file.
#[derive(Debug, Clone)]
pub struct NodeFileConfig {
    /// Path of the record file.
    pub index_path: PathBuf,
    /// Path of the file holding the persisted node count.
    pub size_path: PathBuf,
    /// Bytes per node record.
    pub record_size: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

/// Reads and writes node records at `node_id * record_size`.
///
/// The size file holds a single native-endian u32 with the number of nodes
/// that were persisted by the last clean shutdown. An empty or missing size
/// file means an empty index.
pub struct NodeFile {
    /// Configuration.
    config: NodeFileConfig,
    /// The open record file.
    handle: Mutex<FileHandle>,
}

/// Handle for the open record file.
struct FileHandle {
    /// The file handle.
    file: File,
    /// Number of whole records in the file.
    num_records: u32,
}

impl NodeFile {
    /// Opens or creates the record file.
    pub fn open(config: NodeFileConfig) -> Result<Self> {
        if config.record_size == 0 {
            return Err(TrieBulkError::InvalidParameter {
                name: "record_size".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(parent) = config.index_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.index_path)?;

        let file_size = file.metadata()?.len();
        let num_records = (file_size / config.record_size as u64) as u32;

        Ok(Self {
            config,
            handle: Mutex::new(FileHandle { file, num_records }),
        })
    }

    /// Returns the record file path.
    pub fn path(&self) -> &Path {
        &self.config.index_path
    }

    /// Returns the bytes per record.
    pub fn record_size(&self) -> usize {
        self.config.record_size
    }

    /// Returns the number of whole records in the file.
    pub fn num_records(&self) -> u32 {
        self.handle.lock().num_records
    }

    /// Reads the record of `node_id`.
    pub fn read_record(&self, node_id: NodeId) -> Result<Vec<u8>> {
        let mut handle = self.handle.lock();
        if node_id.0 >= handle.num_records {
            return Err(TrieBulkError::NodeNotFound { node_id: node_id.0 });
        }

        let offset = node_id.file_offset(self.config.record_size);
        seek_to(&mut handle.file, offset, self.config.record_size)?;

        let mut buffer = vec![0u8; self.config.record_size];
        let read = read_full(&mut handle.file, &mut buffer)?;
        if read < buffer.len() {
            return Err(TrieBulkError::ShortRead {
                node_id: node_id.0,
                expected: buffer.len(),
                actual: read,
            });
        }

        Ok(buffer)
    }

    /// Writes the record of an existing node.
    pub fn write_record(&self, node_id: NodeId, data: &[u8]) -> Result<()> {
        self.check_len(data)?;
        let mut handle = self.handle.lock();
        if node_id.0 > handle.num_records {
            return Err(TrieBulkError::NodeNotFound { node_id: node_id.0 });
        }

        let offset = node_id.file_offset(self.config.record_size);
        seek_to(&mut handle.file, offset, self.config.record_size)?;
        handle.file.write_all(data)?;

        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }

        if node_id.0 == handle.num_records {
            handle.num_records += 1;
        }

        Ok(())
    }

    /// Appends the record of a freshly allocated node.
    ///
    /// Node ids and record numbers advance together, so the id must equal
    /// the current record count.
    pub fn append_record(&self, node_id: NodeId, data: &[u8]) -> Result<()> {
        let expected = self.num_records();
        if node_id.0 != expected {
            return Err(TrieBulkError::Internal(format!(
                "appending {} but the file holds {} records",
                node_id, expected
            )));
        }
        self.write_record(node_id, data)
    }

    /// Cuts the file down to `records` whole records.
    pub fn truncate(&self, records: u32) -> Result<()> {
        let mut handle = self.handle.lock();
        if records >= handle.num_records {
            return Ok(());
        }
        handle
            .file
            .set_len(records as u64 * self.config.record_size as u64)?;
        handle.num_records = records;
        Ok(())
    }

    /// Reads the persisted node count.
    pub fn read_node_count(&self) -> Result<u32> {
        let mut file = match File::open(&self.config.size_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        match len {
            0 => Ok(0),
            4 => {
                let mut buf = [0u8; 4];
                file.read_exact(&mut buf)?;
                Ok(u32::from_ne_bytes(buf))
            }
            _ => Err(TrieBulkError::SizeFileCorrupted { len }),
        }
    }

    /// Rewrites the persisted node count.
    pub fn write_node_count(&self, count: u32) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.config.size_path)?;
        file.write_all(&count.to_ne_bytes())?;
        if self.config.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.handle.lock().file.sync_all()?;
        Ok(())
    }

    fn check_len(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.config.record_size {
            return Err(TrieBulkError::RecordSizeMismatch {
                expected: self.config.record_size,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

impl Drop for NodeFile {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Positions `file` at `offset`.
///
/// Offsets past `MAX_ABSOLUTE_SEEK` are reached by rewinding and stepping
/// forward in whole records.
fn seek_to(file: &mut File, offset: u64, record_size: usize) -> Result<()> {
    if offset <= MAX_ABSOLUTE_SEEK {
        file.seek(SeekFrom::Start(offset))?;
        return Ok(());
    }

    let step = (MAX_ABSOLUTE_SEEK / record_size as u64).max(1) * record_size as u64;
    file.seek(SeekFrom::Start(0))?;
    let mut remaining = offset;
    while remaining > 0 {
        let delta = remaining.min(step);
        file.seek(SeekFrom::Current(delta as i64))?;
        remaining -= delta;
    }
    Ok(())
}

/// Reads until `buf` is full or the file ends. Returns the bytes read.
fn read_full(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}
