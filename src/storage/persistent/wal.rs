//! Write-ahead log for the persistent entity store.
//!
//! Every insert and merge is appended here before it becomes visible in the
//! in-memory index. Reopening the store replays the log from the start.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: codec-framed WalEntry]
//! [FRAME 2: codec-framed WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::CanonicalEntity;

use super::codec;

/// A single log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, starting at 1.
    pub sequence: u64,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// The logged mutation.
    pub kind: WalEntryKind,
}

/// The mutation a log record carries.
///
/// Both variants hold the full post-mutation snapshot, so replay never has to
/// recompute a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A newly created entity.
    Insert(CanonicalEntity),
    /// An entity after a variation was added.
    Merge(CanonicalEntity),
}

struct WalWriter {
    file: File,
    sequence: u64,
    /// Byte length of the file up to the end of the last acknowledged record.
    valid_len: u64,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

/// Append-only entity log.
///
/// Thread-safe via an internal mutex; the owning store additionally serializes
/// appends with its index lock so log order matches apply order.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
    #[cfg(test)]
    fail_next: AtomicBool,
}

impl WriteAheadLog {
    /// Open or create a log file.
    ///
    /// A new file gets the header; an existing file is scanned for its last
    /// intact sequence number.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;

        let sequence = if is_new {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        } else {
            let (sequence, valid_len) = Self::scan(path)?;
            let file = OpenOptions::new().write(true).open(path)?;
            if file.metadata()?.len() > valid_len {
                tracing::warn!(path = %path.display(), valid_len, "truncating torn tail of entity log");
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            sequence
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let valid_len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file,
                sequence,
                valid_len,
                failed: false,
            }),
            sync_on_write,
            #[cfg(test)]
            fail_next: AtomicBool::new(false),
        })
    }

    /// Append a record, returning its sequence number.
    ///
    /// A failed append leaves no trace: whatever part of the frame reached the
    /// file is cut off again. If that cut fails too, the log refuses further
    /// appends until it is reopened, where the torn tail is dropped.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| IoError::new(ErrorKind::Other, "poisoned lock: wal.append"))?;

        if writer.failed {
            return Err(IoError::new(
                ErrorKind::Other,
                "entity log is unusable after a failed write; reopen the store",
            ));
        }

        let sequence = writer.sequence + 1;
        let frame = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        if let Err(e) = self.write_frame(&mut writer.file, &frame) {
            let valid_len = writer.valid_len;
            match writer.file.set_len(valid_len) {
                Ok(()) => {
                    tracing::warn!(error = %e, valid_len, "rolled back failed entity log append");
                }
                Err(rollback) => {
                    writer.failed = true;
                    tracing::error!(
                        error = %e,
                        rollback_error = %rollback,
                        "could not roll back failed entity log append"
                    );
                }
            }
            return Err(e);
        }

        writer.valid_len += frame.len() as u64;
        writer.sequence = sequence;
        Ok(sequence)
    }

    fn write_frame(&self, file: &mut File, frame: &[u8]) -> IoResult<()> {
        #[cfg(test)]
        if self.fail_next.swap(false, Ordering::SeqCst) {
            file.write_all(&frame[..frame.len() / 2])?;
            return Err(IoError::new(ErrorKind::Other, "injected write failure"));
        }

        file.write_all(frame)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Make the next append fail after writing half of its frame.
    #[cfg(test)]
    pub(crate) fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Iterate over all records from the start of the file.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// The sequence number of the last appended record (0 when empty).
    pub fn current_sequence(&self) -> IoResult<u64> {
        self.writer
            .lock()
            .map(|w| w.sequence)
            .map_err(|_| IoError::new(ErrorKind::Other, "poisoned lock: wal.current_sequence"))
    }

    /// Returns the last intact sequence number and the byte length it ends at.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last = 0;
        let mut valid_len = iter.reader.stream_position()?;
        while let Some(entry) = iter.next() {
            last = entry?.sequence;
            valid_len = iter.reader.stream_position()?;
        }
        Ok((last, valid_len))
    }
}

/// Iterator over log records.
///
/// A record cut short at the end of the file (a torn final write) ends the
/// iteration; any other decoding failure is yielded as an error.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!(error = %e, "ignoring torn record at end of entity log");
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NewEntity;
    use tempfile::tempdir;

    fn entity(name: &str) -> CanonicalEntity {
        NewEntity::new(name).variation(name).phonetic_key(name).materialize()
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        let e = entity("apple");
        wal.append(WalEntryKind::Insert(e.clone())).unwrap();
        let merged = e.with_variation("Apple", &["apple".to_string()]).unwrap();
        wal.append(WalEntryKind::Merge(merged)).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[0].kind, WalEntryKind::Insert(_)));
        let WalEntryKind::Merge(ref m) = entries[1].kind else {
            panic!("expected merge entry");
        };
        assert_eq!(m.variations, vec!["apple", "Apple"]);
    }

    #[test]
    fn test_wal_sequence_continues_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");

        {
            let wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append(WalEntryKind::Insert(entity("a"))).unwrap();
        }

        let wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.append(WalEntryKind::Insert(entity("b"))).unwrap(), 2);
    }

    #[test]
    fn test_wal_ignores_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");

        {
            let wal = WriteAheadLog::open(&path, false).unwrap();
            wal.append(WalEntryKind::Insert(entity("a"))).unwrap();
            wal.append(WalEntryKind::Insert(entity("b"))).unwrap();
        }

        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        assert_eq!(wal.iter().unwrap().count(), 1);

        // Appends after recovery land on a clean boundary.
        assert_eq!(wal.append(WalEntryKind::Insert(entity("c"))).unwrap(), 2);
        let names: Vec<String> = wal
            .iter()
            .unwrap()
            .map(|e| match e.unwrap().kind {
                WalEntryKind::Insert(x) | WalEntryKind::Merge(x) => x.canonical_name,
            })
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_wal_failed_append_is_rolled_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entities.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        wal.append(WalEntryKind::Insert(entity("a"))).unwrap();
        let len = std::fs::metadata(&path).unwrap().len();

        wal.fail_next_write();
        assert!(wal.append(WalEntryKind::Insert(entity("b"))).is_err());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
        assert_eq!(wal.current_sequence().unwrap(), 1);

        // The next record reuses the sequence number of the failed one.
        assert_eq!(wal.append(WalEntryKind::Insert(entity("c"))).unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
