mod config;
mod record;
mod segment;

pub use config::{Config, SegmentConfig};
pub use record::Record;
pub use segment::index::IndexError;
pub use segment::store::StoreError;
pub use segment::SegmentError;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use segment::Segment;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// No segment covers the requested offset.
    #[error("offset out of range: {0}")]
    OffsetOutOfRange(u64),

    /// A `.store` file without its `.index` partner, or the reverse.
    #[error("segment {base} is missing its {missing} file")]
    MissingSegmentFile { base: u64, missing: &'static str },

    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    /// The log was closed and can no longer be appended to or read.
    #[error("log is closed")]
    Closed,
}

/// CommitLog
///
/// The commit log is an ordered sequence of opaque records identified by
/// monotonically increasing 64-bit offsets, persisted under one
/// directory and split across rolling segments bounded by size.
///
/// Appends always land in the newest segment, the active one. When a
/// write would push the active segment past a size bound, the log rolls:
/// it opens a fresh segment whose base offset continues where the full
/// one stopped, and the full segment is never written again (it stays
/// readable).
///
/// ```ignore
///                                                    next append
/// segment 10                                              ^
/// |-------------------------------|                       |
/// | record 10 |  ...  | record 52 | segment 53 (active)   |
/// |-------------------------------|-----------------------| --> time
///                                 | record 53 | ...       |
///                                 |-----------------------|
/// ```
///
/// Reads locate the owning segment by offset range and can run from many
/// threads at once; a readers-writer lock keeps them out of the way of
/// the single append path. Reopening the log from the same directory
/// restores every segment from its `{base}.store` / `{base}.index` pair.
pub struct CommitLog {
    /// Root directory for the segment files.
    dir: PathBuf,

    config: Config,

    /// All segments, sorted ascending by base offset. The last one is the
    /// active segment; emptied only by `close`.
    segments: RwLock<Vec<Segment>>,
}

impl CommitLog {
    /// Open the log rooted at `dir`, creating the directory and the first
    /// segment when nothing is there yet.
    pub fn new(dir: impl Into<PathBuf>, config: Config) -> Result<Self, Error> {
        let dir = dir.into();
        let config = config.normalized()?;
        if !dir.as_path().exists() {
            fs::create_dir_all(&dir)?;
        }

        let segments = Self::load_segments(&dir, config)?;
        debug!(
            dir = %dir.display(),
            segments = segments.len(),
            "commit log opened"
        );

        Ok(CommitLog {
            dir,
            config,
            segments: RwLock::new(segments),
        })
    }

    /// Discover existing segments by their `.store` files, oldest first,
    /// and open them in order. An empty directory gets one fresh segment
    /// based at the configured initial offset.
    fn load_segments(dir: &Path, config: Config) -> Result<Vec<Segment>, Error> {
        let mut store_bases = Vec::new();
        let mut index_bases = BTreeSet::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let base = match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(base) => base,
                None => continue,
            };
            match path.extension().and_then(|e| e.to_str()) {
                Some("store") => store_bases.push(base),
                Some("index") => {
                    index_bases.insert(base);
                }
                _ => {}
            }
        }

        store_bases.sort_unstable();
        for &base in &store_bases {
            if !index_bases.remove(&base) {
                return Err(Error::MissingSegmentFile {
                    base,
                    missing: "index",
                });
            }
        }
        if let Some(&base) = index_bases.iter().next() {
            return Err(Error::MissingSegmentFile {
                base,
                missing: "store",
            });
        }

        let mut segments = Vec::with_capacity(store_bases.len().max(1));
        for base in store_bases {
            segments.push(Segment::open(dir, base, config.segment)?);
        }
        if segments.is_empty() {
            segments.push(Segment::open(
                dir,
                config.segment.initial_offset,
                config.segment,
            )?);
        }
        Ok(segments)
    }

    /// Append `record` and return the absolute offset it was assigned.
    ///
    /// When the active segment reports it is out of space, the log rolls
    /// to a new segment based at the next unassigned offset and retries
    /// there; the retry cannot fail for space again because the record
    /// already passed the oversized check against an empty segment.
    pub fn append(&self, mut record: Record) -> Result<u64, Error> {
        let mut segments = self.segments.write();
        let active = segments.last_mut().ok_or(Error::Closed)?;

        match active.append(&mut record) {
            Ok(offset) => {
                if active.is_maxed() {
                    // The record is already durable. If opening the next
                    // segment fails now, the next append runs into the
                    // space check and retries the roll.
                    if let Err(e) = Self::roll(&self.dir, self.config, &mut segments, offset + 1) {
                        warn!(error = %e, base = offset + 1, "deferred segment roll");
                    }
                }
                Ok(offset)
            }
            Err(SegmentError::NotEnoughSpace { last_offset }) => {
                Self::roll(&self.dir, self.config, &mut segments, last_offset + 1)?;
                let active = segments.last_mut().ok_or(Error::Closed)?;
                Ok(active.append(&mut record)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn roll(
        dir: &Path,
        config: Config,
        segments: &mut Vec<Segment>,
        base: u64,
    ) -> Result<(), Error> {
        debug!(base, "rolling to a new active segment");
        segments.push(Segment::open(dir, base, config.segment)?);
        Ok(())
    }

    /// Read the record stored at `offset`.
    pub fn read(&self, offset: u64) -> Result<Record, Error> {
        let segments = self.segments.read();
        if segments.is_empty() {
            return Err(Error::Closed);
        }

        let segment = segments
            .iter()
            .find(|s| s.contains(offset))
            .ok_or(Error::OffsetOutOfRange(offset))?;
        match segment.read(offset) {
            Err(SegmentError::Index(IndexError::InvalidRelativeOffset(_))) => {
                Err(Error::OffsetOutOfRange(offset))
            }
            result => Ok(result?),
        }
    }

    /// Base offset of the oldest segment.
    pub fn lowest_offset(&self) -> Result<u64, Error> {
        let segments = self.segments.read();
        let first = segments.first().ok_or(Error::Closed)?;
        Ok(first.base_offset())
    }

    /// Highest offset assigned so far, or 0 when nothing was ever
    /// appended to a log based at 0.
    pub fn highest_offset(&self) -> Result<u64, Error> {
        let segments = self.segments.read();
        let last = segments.last().ok_or(Error::Closed)?;
        let next = last.next_offset();
        Ok(if next == 0 { 0 } else { next - 1 })
    }

    /// Drop every segment whose records all sit at or below `lowest`,
    /// deleting their files. Reclaims space taken by a consumed prefix.
    pub fn truncate(&self, lowest: u64) -> Result<(), Error> {
        let mut segments = self.segments.write();
        let next_base = segments.last().ok_or(Error::Closed)?.next_offset();

        let mut kept = Vec::with_capacity(segments.len());
        for segment in std::mem::take(&mut *segments) {
            if segment.next_offset() <= lowest + 1 {
                debug!(base = segment.base_offset(), "removing truncated segment");
                segment.remove()?;
            } else {
                kept.push(segment);
            }
        }
        // Truncating everything still leaves the log appendable: offsets
        // continue where the removed tail stopped.
        if kept.is_empty() {
            kept.push(Segment::open(&self.dir, next_base, self.config.segment)?);
        }
        *segments = kept;
        Ok(())
    }

    /// Delete every segment file in the directory and start over as a
    /// fresh log with the same config; the next append is assigned the
    /// configured initial offset.
    pub fn reset(&self) -> Result<(), Error> {
        let mut segments = self.segments.write();
        warn!(dir = %self.dir.display(), "resetting commit log");

        for segment in std::mem::take(&mut *segments) {
            segment.remove()?;
        }
        // Stray pairs that never made it into the segment list.
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if is_segment_file(&path) {
                fs::remove_file(&path)?;
            }
        }

        *segments = Self::load_segments(&self.dir, self.config)?;
        Ok(())
    }

    /// Close every segment, truncating index files to their logical
    /// sizes. Later operations fail with `Closed`.
    pub fn close(&self) -> Result<(), Error> {
        let mut segments = self.segments.write();
        debug!(dir = %self.dir.display(), "closing commit log");
        for segment in std::mem::take(&mut *segments) {
            segment.close()?;
        }
        Ok(())
    }
}

fn is_segment_file(path: &Path) -> bool {
    let stem_is_digits = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map_or(false, |s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
    let ext = path.extension().and_then(|e| e.to_str());
    stem_is_digits && matches!(ext, Some("store") | Some("index"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn config(max_store_bytes: u64, max_index_bytes: u64, initial_offset: u64) -> Config {
        Config {
            segment: SegmentConfig {
                max_store_bytes,
                max_index_bytes,
                initial_offset,
            },
        }
    }

    #[test]
    fn test_create() {
        // create folder
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("log");
        CommitLog::new(&path, Config::default()).unwrap();
        assert!(path.exists());

        // accept an existing folder
        CommitLog::new(&path, Config::default()).unwrap();
    }

    #[test]
    fn test_append_then_read() {
        let dir = tempdir().unwrap();
        let log = CommitLog::new(dir.path(), Config::default()).unwrap();

        assert_eq!(log.append(Record::new("first")).unwrap(), 0);
        assert_eq!(log.append(Record::new("second")).unwrap(), 1);

        let record = log.read(0).unwrap();
        assert_eq!(record.value, b"first");
        assert_eq!(record.offset, 0);
        assert_eq!(log.read(1).unwrap().value, b"second");
    }

    #[test]
    fn test_read_out_of_range() {
        let dir = tempdir().unwrap();
        let log = CommitLog::new(dir.path(), config(0, 0, 1)).unwrap();

        assert!(matches!(log.read(1), Err(Error::OffsetOutOfRange(1))));

        log.append(Record::new("x")).unwrap();
        assert!(matches!(log.read(0), Err(Error::OffsetOutOfRange(0))));
        assert!(matches!(log.read(2), Err(Error::OffsetOutOfRange(2))));
        assert_eq!(log.read(1).unwrap().value, b"x");
    }

    #[test]
    fn test_offset_range_bookkeeping() {
        let dir = tempdir().unwrap();
        let log = CommitLog::new(dir.path(), config(0, 0, 5)).unwrap();

        assert_eq!(log.lowest_offset().unwrap(), 5);
        assert_eq!(log.highest_offset().unwrap(), 4);

        for i in 0..10 {
            assert_eq!(log.append(Record::new(format!("{i}"))).unwrap(), 5 + i);
        }
        assert_eq!(log.lowest_offset().unwrap(), 5);
        assert_eq!(log.highest_offset().unwrap(), 14);
    }

    #[test]
    fn test_missing_index_partner_is_fatal() {
        let dir = tempdir().unwrap();
        let log = CommitLog::new(dir.path(), Config::default()).unwrap();
        log.append(Record::new("x")).unwrap();
        log.close().unwrap();

        fs::remove_file(dir.path().join("0.index")).unwrap();
        match CommitLog::new(dir.path(), Config::default()) {
            Err(Error::MissingSegmentFile {
                base: 0,
                missing: "index",
            }) => {}
            other => panic!("expected missing index file, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_store_partner_is_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("7.index"), b"").unwrap();

        assert!(matches!(
            CommitLog::new(dir.path(), Config::default()),
            Err(Error::MissingSegmentFile {
                base: 7,
                missing: "store",
            })
        ));
    }

    #[test]
    fn test_unrelated_files_are_ignored_on_open() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("README"), b"not a segment").unwrap();
        fs::write(dir.path().join("backup.store"), b"no digits").unwrap();

        let log = CommitLog::new(dir.path(), Config::default()).unwrap();
        assert_eq!(log.append(Record::new("x")).unwrap(), 0);
    }

    #[test]
    fn test_closed_log_rejects_operations() {
        let dir = tempdir().unwrap();
        let log = CommitLog::new(dir.path(), Config::default()).unwrap();
        log.append(Record::new("x")).unwrap();
        log.close().unwrap();

        assert!(matches!(log.append(Record::new("y")), Err(Error::Closed)));
        assert!(matches!(log.read(0), Err(Error::Closed)));
        assert!(matches!(log.lowest_offset(), Err(Error::Closed)));
        assert!(matches!(log.highest_offset(), Err(Error::Closed)));
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let dir = tempdir().unwrap();
        let log = Arc::new(CommitLog::new(dir.path(), Config::default()).unwrap());

        let writer = {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 0..200u64 {
                    assert_eq!(log.append(Record::new(format!("{i:03}"))).unwrap(), i);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    // Every offset at or below the published highest must
                    // be readable.
                    for _ in 0..50 {
                        let highest = log.highest_offset().unwrap();
                        if highest == 0 {
                            continue;
                        }
                        let record = log.read(highest).unwrap();
                        assert_eq!(record.offset, highest);
                        assert_eq!(record.value, format!("{highest:03}").into_bytes());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
