use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap::MmapMut;
use thiserror::Error;

/// Width of the relative-offset column of an entry.
const OFF_WIDTH: usize = 4;
/// Width of the store-position column of an entry.
const POS_WIDTH: usize = 8;
/// Width of one index entry on disk.
pub(crate) const ENTRY_WIDTH: u64 = (OFF_WIDTH + POS_WIDTH) as u64;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Reading an index that has no entries yet. Segments catch this on
    /// open to learn they are starting from scratch.
    #[error("index file is empty")]
    EmptyIndexFile,

    /// The requested entry is outside `[-1, max_rel]`.
    #[error("invalid relative offset: {0}")]
    InvalidRelativeOffset(i64),

    /// The mapping is full. Segments translate this into a roll signal.
    #[error("not enough index space")]
    NotEnoughSpace,
}

/// Index
///
/// A wrapper for the index file, which points into the store file.
///
/// Every store has an index companion, e.g.:
///
/// 42.store
/// 42.index
///
/// The index is a table of fixed-width entries, one per record. Each
/// entry is the record's 4-byte relative offset within the segment
/// followed by the 8-byte position of its frame in the store file, both
/// big-endian:
///
/// ```ignore
///                    logical size          mapping length
///                          ^                      ^
/// |-------------------------------------------|
/// | rel | pos | rel | pos |     zero padding  |----> time
/// |-------------------------------------------|
/// ```
///
/// The whole file is memory-mapped, and a mapping cannot grow, so the
/// file is padded to its maximum size at open and shrunk back to the
/// logical size (entries actually written) on close. The logical size is
/// what survives a clean close and tells a reopened segment its entry
/// count.
pub struct Index {
    file: File,

    /// Live for the whole life of the index; released exactly once, on
    /// close or drop.
    mmap: Option<MmapMut>,

    /// Bytes logically written. Always a multiple of `ENTRY_WIDTH`.
    size: u64,
}

impl Index {
    /// Open `path`, pad it to `max_index_bytes`, and map it read-write.
    /// The logical size keeps tracking only the bytes already populated.
    pub fn open(path: &Path, max_index_bytes: u64) -> Result<Self, IndexError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let size = file.metadata()?.len();
        file.set_len(max_index_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Index {
            file,
            mmap: Some(mmap),
            size,
        })
    }

    /// Append one `(relative offset, store position)` entry.
    pub fn write(&mut self, rel_offset: u32, position: u64) -> Result<(), IndexError> {
        let mmap = self.mmap.as_mut().expect("index mapping released");
        if self.size + ENTRY_WIDTH > mmap.len() as u64 {
            return Err(IndexError::NotEnoughSpace);
        }

        let at = self.size as usize;
        BigEndian::write_u32(&mut mmap[at..at + OFF_WIDTH], rel_offset);
        BigEndian::write_u64(&mut mmap[at + OFF_WIDTH..at + OFF_WIDTH + POS_WIDTH], position);
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Look up an entry. `rel_offset` is the entry's relative offset, or
    /// `-1` for the last entry written, which is how a reopened segment
    /// recovers its entry count. Returns the entry's relative offset and
    /// store position.
    pub fn read(&self, rel_offset: i64) -> Result<(u32, u64), IndexError> {
        if self.size == 0 {
            return Err(IndexError::EmptyIndexFile);
        }

        let max_rel = (self.size / ENTRY_WIDTH - 1) as i64;
        if rel_offset < -1 || rel_offset > max_rel {
            return Err(IndexError::InvalidRelativeOffset(rel_offset));
        }
        let rel = if rel_offset == -1 {
            max_rel as u32
        } else {
            rel_offset as u32
        };

        let mmap = self.mmap.as_ref().expect("index mapping released");
        let at = rel as usize * ENTRY_WIDTH as usize;
        let stored_rel = BigEndian::read_u32(&mmap[at..at + OFF_WIDTH]);
        let position = BigEndian::read_u64(&mmap[at + OFF_WIDTH..at + OFF_WIDTH + POS_WIDTH]);
        Ok((stored_rel, position))
    }

    /// True iff one more entry still fits in the mapping.
    pub fn has_space(&self) -> bool {
        let mmap = self.mmap.as_ref().expect("index mapping released");
        self.size + ENTRY_WIDTH <= mmap.len() as u64
    }

    /// Bytes logically written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Sync the mapping and the file, then shrink the file back to the
    /// logical size so the next open sees the true entry count.
    pub fn close(mut self) -> Result<(), IndexError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), IndexError> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush()?;
            self.file.sync_all()?;
            drop(mmap);
            self.file.set_len(self.size)?;
        }
        Ok(())
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        // close() is the error-reporting path; the drop path can only
        // release the mapping and restore the on-disk length quietly.
        let _ = self.release();
    }
}
