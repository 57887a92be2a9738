use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use parking_lot::Mutex;
use thiserror::Error;

/// Number of bytes used by the length prefix of every frame.
pub(crate) const LEN_WIDTH: u64 = 8;

/// Capacity of the write buffer sitting between appends and the file.
const BUF_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The frame starting at `position` claims more bytes than the file
    /// holds: a truncated write or on-disk corruption.
    #[error("corrupt frame at position {position}")]
    CorruptFrame { position: u64 },
}

/// Store
///
/// A wrapper for the store file, where record payloads live.
///
/// The store is an append-only file of length-prefixed frames. Each frame
/// is an 8-byte big-endian length followed by that many payload bytes,
/// placed sequentially on the byte stream:
///
/// ```ignore
///                                    current size
///                                          ^
/// |-----------------------------------------|
/// | len | payload | len | payload |   ...   |----> time
/// |-----------------------------------------|
/// ```
///
/// Appends go through a write buffer to keep syscalls off the hot path;
/// every positional read flushes that buffer first so a reader always
/// observes all prior appends. A single mutex serializes both paths.
pub struct Store {
    inner: Mutex<Inner>,
}

struct Inner {
    reader: File,
    writer: BufWriter<File>,

    /// Total bytes written, initialized from the file length at open.
    size: u64,
}

impl Store {
    /// Open `path` for appending, creating it if needed. An existing file
    /// keeps its contents and the new writes land at the end.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let size = file.metadata()?.len();
        let writer = BufWriter::with_capacity(BUF_CAPACITY, file.try_clone()?);

        Ok(Store {
            inner: Mutex::new(Inner {
                reader: file,
                writer,
                size,
            }),
        })
    }

    /// Append one frame. Returns the number of bytes written (payload plus
    /// length prefix) and the file position where the frame begins.
    pub fn append(&self, bytes: &[u8]) -> Result<(u64, u64), StoreError> {
        let mut inner = self.inner.lock();

        let position = inner.size;
        inner.writer.write_u64::<BigEndian>(bytes.len() as u64)?;
        inner.writer.write_all(bytes)?;

        let written = LEN_WIDTH + bytes.len() as u64;
        inner.size += written;
        Ok((written, position))
    }

    /// Read back the payload of the frame starting at `position`.
    pub fn read(&self, position: u64) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;

        let mut len = [0u8; LEN_WIDTH as usize];
        read_fully(&inner.reader, &mut len, position)?;

        let mut payload = vec![0u8; BigEndian::read_u64(&len) as usize];
        read_fully(&inner.reader, &mut payload, position + LEN_WIDTH)?;
        Ok(payload)
    }

    /// Positional read of raw store bytes, ignoring frame boundaries.
    /// Returns the number of bytes read.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        Ok(inner.reader.read_at(buf, offset)?)
    }

    /// Total bytes written to the store so far.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Flush buffered appends and release the file handles.
    pub fn close(self) -> Result<(), StoreError> {
        let mut inner = self.inner.into_inner();
        inner.writer.flush()?;
        Ok(())
    }
}

fn read_fully(file: &File, buf: &mut [u8], position: u64) -> Result<(), StoreError> {
    file.read_exact_at(buf, position).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StoreError::CorruptFrame { position },
        _ => StoreError::Io(e),
    })
}
