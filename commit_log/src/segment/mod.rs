pub mod index;
pub mod store;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use prost::Message;
use thiserror::Error;

use crate::config::SegmentConfig;
use crate::record::Record;

use self::index::{Index, IndexError};
use self::store::{Store, StoreError, LEN_WIDTH};

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// The space pre-check failed, nothing was written. `last_offset` is
    /// the highest offset already assigned here; the log rolls to
    /// `last_offset + 1`.
    #[error("not enough segment space after offset {last_offset}")]
    NotEnoughSpace { last_offset: u64 },

    /// The record's frame could not fit even an empty store file, so
    /// rolling would never help.
    #[error("record frame of {frame_bytes} bytes exceeds the {max_store_bytes}-byte store bound")]
    RecordTooLarge {
        frame_bytes: u64,
        max_store_bytes: u64,
    },

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
}

/// Segment
///
/// A high-level wrapper pairing one store file with one index file.
///
/// Every segment covers a contiguous range of absolute offsets and is
/// named after the first of them, e.g.:
///
/// 1024.store
/// 1024.index
///
/// The segment assigns absolute offsets on append: the record goes into
/// the store file, the frame position goes into the index under the
/// record's relative offset, and `next_offset` advances. Reads run the
/// same path backwards.
///
/// The segment also polices its size bounds. An append that would push
/// either file past its bound fails up front with a "not enough space"
/// signal the log uses to roll to a fresh segment; a segment that has
/// reached a bound reports itself maxed.
pub struct Segment {
    store: Store,
    index: Index,
    store_path: PathBuf,
    index_path: PathBuf,

    /// Absolute offset of the first record stored here.
    base_offset: u64,

    /// Absolute offset the next append will be assigned.
    next_offset: u64,

    config: SegmentConfig,
}

impl Segment {
    /// Open (or create) the segment based at `base_offset` inside `dir`.
    ///
    /// A reopened segment recovers `next_offset` from its index: the last
    /// entry's relative offset tells it how many records it already
    /// holds, and an empty index means it is starting from scratch.
    pub fn open(dir: &Path, base_offset: u64, config: SegmentConfig) -> Result<Self, SegmentError> {
        let store_path = dir.join(format!("{base_offset}.store"));
        let index_path = dir.join(format!("{base_offset}.index"));

        let store = Store::open(&store_path)?;
        let index = Index::open(&index_path, config.max_index_bytes)?;

        let next_offset = match index.read(-1) {
            Ok((last_rel, _)) => base_offset + u64::from(last_rel) + 1,
            Err(IndexError::EmptyIndexFile) => base_offset,
            Err(e) => return Err(e.into()),
        };

        Ok(Segment {
            store,
            index,
            store_path,
            index_path,
            base_offset,
            next_offset,
            config,
        })
    }

    /// Assign the next absolute offset to `record` and persist it.
    ///
    /// The space check runs before anything touches disk, so a full
    /// segment never ends up with a store frame missing its index entry.
    pub fn append(&mut self, record: &mut Record) -> Result<u64, SegmentError> {
        record.offset = self.next_offset;

        let frame_bytes = record.encoded_len() as u64 + LEN_WIDTH;
        if frame_bytes > self.config.max_store_bytes {
            return Err(SegmentError::RecordTooLarge {
                frame_bytes,
                max_store_bytes: self.config.max_store_bytes,
            });
        }
        if self.store.size() + frame_bytes > self.config.max_store_bytes
            || !self.index.has_space()
        {
            return Err(SegmentError::NotEnoughSpace {
                last_offset: self.next_offset - 1,
            });
        }

        let encoded = record.encode_to_vec();
        let (_, position) = self.store.append(&encoded)?;
        self.index
            .write((self.next_offset - self.base_offset) as u32, position)?;

        self.next_offset += 1;
        Ok(record.offset)
    }

    /// Read the record stored under the absolute offset `offset`.
    pub fn read(&self, offset: u64) -> Result<Record, SegmentError> {
        let rel = offset as i64 - self.base_offset as i64;
        // The index reserves -1 as its last-entry sentinel; an absolute
        // offset one below the base must not alias it.
        if rel == -1 {
            return Err(SegmentError::Index(IndexError::InvalidRelativeOffset(-1)));
        }
        let (_, position) = self.index.read(rel)?;
        let encoded = self.store.read(position)?;
        Ok(Record::decode(&encoded[..])?)
    }

    /// True iff `offset` falls inside this segment's assigned range.
    pub fn contains(&self, offset: u64) -> bool {
        self.base_offset <= offset && offset < self.next_offset
    }

    /// True iff either file is at or past its configured bound.
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes
            || self.index.size() >= self.config.max_index_bytes
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Close the index (truncating it to its logical size) and the store.
    pub fn close(self) -> Result<(), SegmentError> {
        let Segment { store, index, .. } = self;
        index.close()?;
        store.close()?;
        Ok(())
    }

    /// Close, then delete both backing files.
    pub fn remove(self) -> Result<(), SegmentError> {
        let store_path = self.store_path.clone();
        let index_path = self.index_path.clone();
        self.close()?;
        fs::remove_file(index_path)?;
        fs::remove_file(store_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(max_store_bytes: u64, max_index_bytes: u64) -> SegmentConfig {
        SegmentConfig {
            max_store_bytes,
            max_index_bytes,
            initial_offset: 0,
        }
    }

    #[test]
    fn test_create_names_files_after_the_base_offset() {
        let dir = tempdir().unwrap();
        Segment::open(dir.path(), 16, config(1024, 120)).unwrap();

        assert!(dir.path().join("16.store").exists());
        assert!(dir.path().join("16.index").exists());
    }

    #[test]
    fn test_append_assigns_contiguous_offsets() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 120)).unwrap();

        for want in 16..20 {
            let mut record = Record::new(want.to_string());
            assert_eq!(segment.append(&mut record).unwrap(), want);
            assert_eq!(record.offset, want);
        }
        assert_eq!(segment.next_offset(), 20);
    }

    #[test]
    fn test_read_returns_the_stored_record() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 120)).unwrap();

        segment.append(&mut Record::new("first")).unwrap();
        segment.append(&mut Record::new("second")).unwrap();

        let record = segment.read(16).unwrap();
        assert_eq!(record.value, b"first");
        assert_eq!(record.offset, 16);

        let record = segment.read(17).unwrap();
        assert_eq!(record.value, b"second");
        assert_eq!(record.offset, 17);
    }

    #[test]
    fn test_read_outside_the_range_fails() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 120)).unwrap();
        segment.append(&mut Record::new("only")).unwrap();

        assert!(matches!(
            segment.read(17),
            Err(SegmentError::Index(IndexError::InvalidRelativeOffset(1)))
        ));
        assert!(matches!(
            segment.read(2),
            Err(SegmentError::Index(IndexError::InvalidRelativeOffset(-14)))
        ));
    }

    #[test]
    fn test_read_one_below_the_base_does_not_alias_the_last_entry() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 16, config(1024, 120)).unwrap();
        segment.append(&mut Record::new("first")).unwrap();
        segment.append(&mut Record::new("last")).unwrap();

        assert!(matches!(
            segment.read(15),
            Err(SegmentError::Index(IndexError::InvalidRelativeOffset(-1)))
        ));
    }

    #[test]
    fn test_full_store_signals_not_enough_space() {
        let dir = tempdir().unwrap();
        // Room for exactly two "xx" records at offsets >= 10, whose
        // serialized form is 6 bytes: 2 * (6 + 8).
        let mut segment = Segment::open(dir.path(), 10, config(28, 120)).unwrap();

        segment.append(&mut Record::new("10")).unwrap();
        segment.append(&mut Record::new("11")).unwrap();
        assert!(segment.is_maxed());

        assert!(matches!(
            segment.append(&mut Record::new("12")),
            Err(SegmentError::NotEnoughSpace { last_offset: 11 })
        ));
        // Nothing was written by the failed attempt.
        assert_eq!(segment.next_offset(), 12);
        assert_eq!(segment.read(11).unwrap().value, b"11");
    }

    #[test]
    fn test_full_index_signals_not_enough_space() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 10, config(1024, 24)).unwrap();

        segment.append(&mut Record::new("10")).unwrap();
        segment.append(&mut Record::new("11")).unwrap();
        assert!(segment.is_maxed());

        assert!(matches!(
            segment.append(&mut Record::new("12")),
            Err(SegmentError::NotEnoughSpace { last_offset: 11 })
        ));
    }

    #[test]
    fn test_oversized_record_is_rejected_outright() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 0, config(28, 120)).unwrap();

        assert!(matches!(
            segment.append(&mut Record::new(vec![0u8; 64])),
            Err(SegmentError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_reopen_restores_next_offset() {
        let dir = tempdir().unwrap();

        let mut segment = Segment::open(dir.path(), 16, config(1024, 120)).unwrap();
        segment.append(&mut Record::new("a")).unwrap();
        segment.append(&mut Record::new("b")).unwrap();
        segment.append(&mut Record::new("c")).unwrap();
        segment.close().unwrap();

        let mut segment = Segment::open(dir.path(), 16, config(1024, 120)).unwrap();
        assert_eq!(segment.next_offset(), 19);
        assert_eq!(segment.read(17).unwrap().value, b"b");

        assert_eq!(segment.append(&mut Record::new("d")).unwrap(), 19);
    }

    #[test]
    fn test_remove_deletes_both_files() {
        let dir = tempdir().unwrap();
        let mut segment = Segment::open(dir.path(), 0, config(1024, 120)).unwrap();
        segment.append(&mut Record::new("gone")).unwrap();

        segment.remove().unwrap();
        assert!(!dir.path().join("0.store").exists());
        assert!(!dir.path().join("0.index").exists());
    }
}
